use log::trace;

/// Extracts the directory from a `257` reply.
///
/// Handles the RFC 959 form `257 "dir" comment` (with `""` standing for one
/// quote), servers that put text before the quote (`257 Current directory is "mars:"`)
/// and the AIX form `257 '/path/a"d' ist das aktuelle Verzeichnis.`.
pub fn directory_from_reply(reply: &str) -> Option<String> {
    let Some(rest) = reply.get(4..) else {
        trace!("Get-directory reply is too short: {:?}", reply);
        return None;
    };

    let start = rest.find(|c: char| c == '"' || c == '\'')?;
    let mut quoted = &rest[start..];

    if quoted.starts_with('\'') {
        let inner = &quoted[1..];
        if let Some(last) = inner.rfind('\'') {
            if !inner[last..].contains('"') {
                return Some(inner[..last].to_string());
            }
        }
        match quoted.find('"') {
            Some(pos) => quoted = &quoted[pos..],
            None => {
                trace!("Syntax error in get-directory reply: {:?}", reply);
                return None;
            }
        }
    }

    let mut dir = String::new();
    let mut chars = quoted[1..].chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
            } else {
                return Some(dir);
            }
        }
        dir.push(c);
    }

    trace!("Syntax error in get-directory reply: {:?}", reply);
    None
}
