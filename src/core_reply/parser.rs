use crate::constants::MAX_MALFORMED_REPLY_LINE;
use crate::core_reply::reply::Reply;
use log::trace;

/// A complete reply found at the front of a byte buffer.
///
/// `bytes` covers the whole reply including its final line terminator, so
/// `bytes.len()` is the amount the caller has to skip once it is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawReply<'a> {
    pub bytes: &'a [u8],
    pub code: i32,
}

impl<'a> RawReply<'a> {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_reply(&self) -> Reply {
        Reply::from_bytes(self.code, self.bytes)
    }
}

/// Returns the index of the LF ending the line that contains `from`
/// (CRLF, or a bare LF which some servers send), or `buf.len()` when the
/// line is not complete yet.
fn find_line_end(buf: &[u8], from: usize) -> usize {
    let end = buf.len();
    let mut s = from;
    while s < end {
        if buf[s] == b'\r' && s + 1 < end && buf[s + 1] == b'\n' {
            return s + 1;
        }
        if buf[s] == b'\n' {
            return s;
        }
        s += 1;
    }
    end
}

/// Takes the next reply off the front of `buf` without consuming anything.
///
/// Single-line replies are `nnn text\r\n`. Multi-line replies start with
/// `nnn-` and end with a line repeating the same code followed by a space.
/// A leading line that is not an FTP reply is returned whole with code `-1`
/// (or cut after a thousand characters). `None` means more bytes are needed.
pub fn read_ftp_reply(buf: &[u8]) -> Option<RawReply<'_>> {
    let end = buf.len();
    if end == 0 {
        return None;
    }

    let mut s = 0usize;
    let mut code: i32 = 0;
    let mut digits = 0;
    while s < end && digits < 3 {
        let c = buf[s];
        if c.is_ascii_digit() {
            code = 10 * code + i32::from(c - b'0');
            s += 1;
            digits += 1;
        } else {
            code = -1;
            break;
        }
    }

    if code == -1 {
        trace!("Unexpected syntax of FTP reply (not a three digit number).");
    } else if s < end {
        if buf[s] == b'-' {
            s += 1;
            while s < end {
                s = find_line_end(buf, s);
                if s < end {
                    s += 1;
                    let mut closing = 0;
                    let mut closing_digits = 0;
                    while s < end && closing_digits < 3 && buf[s].is_ascii_digit() {
                        closing = 10 * closing + i32::from(buf[s] - b'0');
                        s += 1;
                        closing_digits += 1;
                    }
                    if closing_digits == 3 && closing == code && s < end && buf[s] == b' ' {
                        break;
                    }
                }
            }
        }

        if s < end && buf[s] == b' ' {
            s = find_line_end(buf, s + 1);
            if s < end {
                return Some(RawReply {
                    bytes: &buf[..s + 1],
                    code,
                });
            }
            return None;
        } else if s < end {
            trace!("Unexpected syntax of FTP reply (space doesn't follow three digit number).");
        }
    }

    // Not an FTP reply: hand back the line so the caller can report it.
    let mut len = 0;
    while s < end {
        if buf[s] == b'\r' && s + 1 < end && buf[s + 1] == b'\n' {
            s += 1;
            break;
        }
        if buf[s] == b'\n' {
            break;
        }
        len += 1;
        if len >= MAX_MALFORMED_REPLY_LINE {
            break;
        }
        s += 1;
    }
    if s < end {
        Some(RawReply {
            bytes: &buf[..s + 1],
            code: -1,
        })
    } else {
        None
    }
}
