use std::fmt;

/// First digit of an FTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    /// 1xx
    Preliminary,
    /// 2xx
    Success,
    /// 3xx
    Intermediate,
    /// 4xx
    TransientFailure,
    /// 5xx
    PermanentFailure,
    /// Malformed line or a code outside 100..=599.
    Unknown,
}

/// One complete reply taken off the receive buffer.
///
/// `code` is `-1` when the line does not look like an FTP reply at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: i32,
    pub text: String,
}

impl Reply {
    pub fn new(code: i32, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    pub fn from_bytes(code: i32, bytes: &[u8]) -> Self {
        Self::new(code, String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn is_malformed(&self) -> bool {
        self.code == -1
    }

    pub fn first_digit(&self) -> Option<u8> {
        if self.code < 0 {
            None
        } else {
            Some(((self.code / 100) % 10) as u8)
        }
    }

    pub fn second_digit(&self) -> Option<u8> {
        if self.code < 0 {
            None
        } else {
            Some(((self.code / 10) % 10) as u8)
        }
    }

    pub fn class(&self) -> ReplyClass {
        match self.first_digit() {
            Some(1) => ReplyClass::Preliminary,
            Some(2) => ReplyClass::Success,
            Some(3) => ReplyClass::Intermediate,
            Some(4) => ReplyClass::TransientFailure,
            Some(5) => ReplyClass::PermanentFailure,
            _ => ReplyClass::Unknown,
        }
    }

    pub fn is_preliminary(&self) -> bool {
        self.class() == ReplyClass::Preliminary
    }

    pub fn is_success(&self) -> bool {
        self.class() == ReplyClass::Success
    }

    pub fn is_intermediate(&self) -> bool {
        self.class() == ReplyClass::Intermediate
    }

    /// 4xx or 5xx.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.class(),
            ReplyClass::TransientFailure | ReplyClass::PermanentFailure
        )
    }

    /// Reply text without the trailing line terminator.
    pub fn trimmed_text(&self) -> &str {
        self.text.trim_end_matches(&['\r', '\n'][..])
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.trimmed_text())
    }
}
