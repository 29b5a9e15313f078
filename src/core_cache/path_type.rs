/// Path syntax of the server, detected from its replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServerPathType {
    #[default]
    Unknown,
    /// No path known yet and nothing in the system reply to go by.
    Empty,
    /// `/pub/dir`
    Unix,
    /// `\pub\dir`, `/pub\dir`, case-insensitive
    Windows,
    /// `DKA0:[PUB.DIR]`
    OpenVms,
    /// `'USER.PUB.DIR'`
    Mvs,
}

/// First word of a `SYST` reply (`215 UNIX Type: L8` gives `UNIX`).
pub fn server_system_name(system_reply: &str) -> &str {
    let rest = match system_reply.get(..3) {
        Some(code) if code.bytes().all(|b| b.is_ascii_digit()) => &system_reply[3..],
        _ => system_reply,
    };
    rest.trim_start_matches(|c: char| c == ' ' || c == '-')
        .split_whitespace()
        .next()
        .unwrap_or("")
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}

#[derive(Default)]
struct PathShape {
    slash_at_beg: bool,
    slashes: usize,
    backslash_at_beg: bool,
    backslashes: usize,
    quote_at_beg: bool,
    quote_at_end: bool,
    quotes: usize,
    open_brackets: usize,
    close_brackets: usize,
    other_brackets: usize,
}

impl PathShape {
    fn of(path: &str) -> Self {
        let mut shape = PathShape::default();
        let bytes = path.as_bytes();
        let mut escaped = false;
        for (i, &b) in bytes.iter().enumerate() {
            if b == b'^' {
                escaped = !escaped;
                continue;
            }
            if escaped {
                escaped = false;
                continue;
            }
            match b {
                b'/' if i == 0 => shape.slash_at_beg = true,
                b'/' => shape.slashes += 1,
                b'\\' if i == 0 => shape.backslash_at_beg = true,
                b'\\' => shape.backslashes += 1,
                b'\'' if i == 0 => shape.quote_at_beg = true,
                b'\'' if i + 1 == bytes.len() => shape.quote_at_end = true,
                b'\'' => shape.quotes += 1,
                b'[' if i == 0 || bytes[i - 1] == b':' => shape.open_brackets += 1,
                b']' if !bytes[i + 1..].iter().any(|&c| matches!(c, b'/' | b'\\' | b'[' | b']')) => {
                    shape.close_brackets += 1
                }
                b'[' | b']' => shape.other_brackets += 1,
                _ => {}
            }
        }
        shape
    }
}

impl ServerPathType {
    /// Guesses the path type from the server greeting, the `SYST` reply and
    /// a path the server reported.
    pub fn detect(first_reply: Option<&str>, system_reply: Option<&str>, path: &str) -> Self {
        let system = system_reply.map(server_system_name).unwrap_or("");
        let shape = PathShape::of(path);

        if shape.slash_at_beg {
            return if contains_ignore_case(system, "Windows") {
                ServerPathType::Windows
            } else {
                ServerPathType::Unix
            };
        }
        if shape.backslash_at_beg {
            return ServerPathType::Windows;
        }
        let bytes = path.as_bytes();
        if bytes.len() >= 2
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes.len() == 2 || shape.slashes + shape.backslashes > 0)
        {
            return ServerPathType::Windows;
        }
        if shape.open_brackets == 1
            && shape.close_brackets == 1
            && shape.other_brackets == 0
            && !shape.quote_at_beg
            && !shape.quote_at_end
            && shape.slashes + shape.backslashes == 0
        {
            return ServerPathType::OpenVms;
        }
        if shape.quote_at_beg && shape.quote_at_end && shape.quotes == 0 {
            return ServerPathType::Mvs;
        }
        if path.is_empty() {
            if contains_ignore_case(system, "UNIX") {
                return ServerPathType::Unix;
            }
            if contains_ignore_case(system, "Windows") {
                return ServerPathType::Windows;
            }
            if contains_ignore_case(system, "VMS") {
                return ServerPathType::OpenVms;
            }
            if contains_ignore_case(system, "MVS") {
                return ServerPathType::Mvs;
            }
            if first_reply.is_some_and(|r| contains_ignore_case(r, "unix")) {
                return ServerPathType::Unix;
            }
            return ServerPathType::Empty;
        }
        ServerPathType::Unknown
    }

    fn is_case_sensitive(self) -> bool {
        !matches!(
            self,
            ServerPathType::Windows | ServerPathType::OpenVms | ServerPathType::Mvs
        )
    }

    fn separator(self) -> char {
        match self {
            ServerPathType::OpenVms | ServerPathType::Mvs => '.',
            _ => '/',
        }
    }

    /// Comparable form: case folded where the server ignores case, one
    /// trailing separator and the closing bracket/quote removed.
    fn normalize(self, path: &str) -> String {
        let mut p = if self.is_case_sensitive() {
            path.to_string()
        } else {
            path.to_ascii_lowercase()
        };
        match self {
            ServerPathType::Windows => {
                p = p.replace('\\', "/");
                if p.ends_with('/') {
                    p.pop();
                }
            }
            ServerPathType::OpenVms => {
                if p.ends_with(']') {
                    p.pop();
                }
                if p.ends_with('.') {
                    p.pop();
                }
                if let Some(pos) = p.find("[000000") {
                    let after = pos + "[000000".len();
                    if p[after..].is_empty() || p[after..].starts_with('.') {
                        let rest = p[after..].trim_start_matches('.').to_string();
                        p.truncate(pos + 1);
                        p.push_str(&rest);
                    }
                }
            }
            ServerPathType::Mvs => {
                p = p.trim_matches('\'').to_string();
                if p.ends_with('.') {
                    p.pop();
                }
            }
            _ => {
                if p.ends_with('/') {
                    p.pop();
                }
            }
        }
        p
    }

    /// True if `prefix` is `path` or one of its parent directories. With
    /// `must_be_same` only the same directory matches.
    pub fn is_prefix_of(self, prefix: &str, path: &str, must_be_same: bool) -> bool {
        let prefix = self.normalize(prefix);
        let path = self.normalize(path);
        if prefix.len() > path.len() || (must_be_same && prefix.len() != path.len()) {
            return false;
        }
        if !path.starts_with(prefix.as_str()) {
            return false;
        }
        if prefix.len() == path.len() {
            return true;
        }
        let is_root = match self {
            ServerPathType::Mvs => prefix.is_empty(),
            ServerPathType::OpenVms => prefix.ends_with('['),
            _ => false,
        };
        is_root || path[prefix.len()..].starts_with(self.separator())
    }

    pub fn is_same_path(self, a: &str, b: &str) -> bool {
        self.is_prefix_of(a, b, true)
    }

    /// Splits the last directory off `path`. Returns the parent path and
    /// the name that was cut, or `None` at the root.
    pub fn cut_directory(self, path: &str) -> Option<(String, String)> {
        match self {
            ServerPathType::OpenVms => cut_vms_directory(path),
            ServerPathType::Mvs => cut_mvs_directory(path),
            ServerPathType::Windows => cut_slash_directory(path, |c| c == '/' || c == '\\'),
            _ => cut_slash_directory(path, |c| c == '/'),
        }
    }

    /// Path as it appears in a URL: VMS and MVS paths lose the leading slash.
    pub fn local_path(self, path: &str) -> &str {
        match self {
            ServerPathType::OpenVms | ServerPathType::Mvs => path
                .strip_prefix(|c: char| c == '/' || c == '\\')
                .unwrap_or(path),
            _ => path,
        }
    }
}

fn cut_slash_directory(path: &str, is_sep: impl Fn(char) -> bool) -> Option<(String, String)> {
    if path.is_empty() {
        return None;
    }
    // the last character is never the separator we cut at
    let search = &path[..path.len() - path.chars().last().map_or(0, char::len_utf8)];
    let last = search.rfind(&is_sep)?;
    let mut cut = path[last + 1..].to_string();
    if cut.ends_with(&is_sep) {
        cut.pop();
    }
    let parent = match path[..last].rfind(&is_sep) {
        None => path[..=last].to_string(),
        Some(_) => path[..last].to_string(),
    };
    Some((parent, cut))
}

fn cut_vms_directory(path: &str) -> Option<(String, String)> {
    let body = path.strip_suffix(']')?;
    let open = body.rfind('[')?;
    let inner = body[open + 1..].trim_end_matches('.');
    let device = &path[..=open];
    match inner.rfind('.') {
        Some(dot) => Some((
            format!("{}{}]", device, &inner[..dot]),
            inner[dot + 1..].to_string(),
        )),
        None if inner.is_empty() || inner == "000000" => None,
        None => Some((format!("{}000000]", device), inner.to_string())),
    }
}

fn cut_mvs_directory(path: &str) -> Option<(String, String)> {
    if path.len() < 2 || !path.starts_with('\'') {
        return None;
    }
    let inner = path[1..].strip_suffix('\'')?.trim_end_matches('.');
    if inner.is_empty() {
        return None;
    }
    match inner.rfind('.') {
        Some(dot) => Some((format!("'{}'", &inner[..dot]), inner[dot + 1..].to_string())),
        None => Some(("''".to_string(), inner.to_string())),
    }
}
