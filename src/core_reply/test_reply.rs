// Reply parser tests

#[cfg(test)]
mod tests {
    use super::super::*;

    /// Feeds `stream` in `chunk`-sized pieces and collects every reply the
    /// parser hands out, the way the receive buffer does.
    fn parse_in_chunks(stream: &[u8], chunk: usize) -> Vec<(i32, Vec<u8>)> {
        let mut pending: Vec<u8> = Vec::new();
        let mut replies = Vec::new();
        for piece in stream.chunks(chunk) {
            pending.extend_from_slice(piece);
            while let Some(raw) = read_ftp_reply(&pending) {
                let taken = raw.len();
                replies.push((raw.code, raw.bytes.to_vec()));
                pending.drain(..taken);
            }
        }
        replies
    }

    const SESSION: &[u8] = b"220-Welcome to the test server\r\n\
220-second line\n\
220 ready\r\n\
331 Please specify the password\r\n\
garbage line\r\n\
230 Login successful\n\
211-Features:\r\n\
 MDTM\r\n\
211x not the end\r\n\
211 End\r\n\
257 \"/home/user\" is the current directory\r\n";

    #[test]
    fn test_chunking_does_not_change_replies() {
        let whole = parse_in_chunks(SESSION, SESSION.len());
        assert_eq!(whole.len(), 6);
        for chunk in 1..=17 {
            assert_eq!(parse_in_chunks(SESSION, chunk), whole, "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_session_codes() {
        let codes: Vec<i32> = parse_in_chunks(SESSION, 1).into_iter().map(|r| r.0).collect();
        assert_eq!(codes, vec![220, 331, -1, 230, 211, 257]);
    }

    #[test]
    fn test_single_line_reply() {
        let raw = read_ftp_reply(b"200 Command okay.\r\nextra").unwrap();
        assert_eq!(raw.code, 200);
        assert_eq!(raw.bytes, b"200 Command okay.\r\n");
        assert_eq!(raw.to_reply().trimmed_text(), "200 Command okay.");
    }

    #[test]
    fn test_incomplete_reply() {
        assert!(read_ftp_reply(b"").is_none());
        assert!(read_ftp_reply(b"2").is_none());
        assert!(read_ftp_reply(b"220").is_none());
        assert!(read_ftp_reply(b"220 hello").is_none());
        assert!(read_ftp_reply(b"220 hello\r").is_none());
        assert!(read_ftp_reply(b"220-hello\r\n220").is_none());
        assert!(read_ftp_reply(b"220-hello\r\n220 bye").is_none());
    }

    #[test]
    fn test_malformed_leading_digits() {
        for line in [&b"HTTP/1.1 400 Bad Request\r\n"[..], b"2x0 nope\r\n", b"22\r\n", b"220x\r\n"] {
            let raw = read_ftp_reply(line).unwrap();
            assert_eq!(raw.code, -1, "{:?}", String::from_utf8_lossy(line));
            assert_eq!(raw.len(), line.len());
        }
    }

    #[test]
    fn test_malformed_line_is_cut() {
        let long = vec![b'x'; 1500];
        let raw = read_ftp_reply(&long).unwrap();
        assert_eq!(raw.code, -1);
        assert_eq!(raw.len(), 1000);
    }

    #[test]
    fn test_multi_line_needs_same_code() {
        let text = b"230-first\r\n231 other code\r\n230 done\r\n";
        let raw = read_ftp_reply(text).unwrap();
        assert_eq!(raw.code, 230);
        assert_eq!(raw.len(), text.len());
    }

    #[test]
    fn test_reply_classes() {
        assert_eq!(Reply::new(150, "150 go").class(), ReplyClass::Preliminary);
        assert!(Reply::new(226, "226 ok").is_success());
        assert!(Reply::new(331, "331 pass").is_intermediate());
        assert!(Reply::new(421, "421 bye").is_failure());
        assert_eq!(Reply::new(501, "").second_digit(), Some(0));
        assert_eq!(Reply::new(-1, "junk").class(), ReplyClass::Unknown);
        assert!(Reply::new(-1, "junk").first_digit().is_none());
    }

    #[test]
    fn test_directory_rfc959() {
        assert_eq!(
            directory_from_reply("257 \"/pub/linux\" is current directory.\r\n"),
            Some("/pub/linux".to_string())
        );
        assert_eq!(
            directory_from_reply("257 \"/a\"\"b\" created\r\n"),
            Some("/a\"b".to_string())
        );
    }

    #[test]
    fn test_directory_text_before_quote() {
        assert_eq!(
            directory_from_reply("257 Current directory is \"mars:\"\r\n"),
            Some("mars:".to_string())
        );
    }

    #[test]
    fn test_directory_aix_forms() {
        assert_eq!(
            directory_from_reply("257 '/projects/a'g'f' ist das aktuelle Verzeichnis.\r\n"),
            Some("/projects/a'g'f".to_string())
        );
        assert_eq!(
            directory_from_reply("257 '/projects/a\"d' ist das aktuelle Verzeichnis.\r\n"),
            Some("/projects/a\"d".to_string())
        );
    }

    #[test]
    fn test_directory_syntax_errors() {
        assert_eq!(directory_from_reply("257"), None);
        assert_eq!(directory_from_reply("257 no quotes here\r\n"), None);
        assert_eq!(directory_from_reply("257 \"/unterminated\r\n"), None);
    }
}
