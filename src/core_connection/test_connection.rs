// Tests de la connexion de contrôle : établissement, commandes, abandon et transfert

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::core_ftpcommand::{FtpCommand, SendOptions};
    use crate::core_network::{ControlSocket, ReadBuffer};
    use rustls::pki_types::CertificateDer;
    use crate::session::TransferMode;
    use crate::testing::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_anonymous_login_reaches_ready() {
        let s = Scripted::new(test_params());
        let _server = logged_in(&s).await;

        assert!(s.conn.is_connected());
        assert_eq!(
            s.conn.connect_history(),
            vec![
                ConnectSubState::Connect,
                ConnectSubState::WaitForLoginPrompt,
                ConnectSubState::SendNextScriptCmd,
                ConnectSubState::SendNextScriptCmd,
                ConnectSubState::SendSystemCommand,
                ConnectSubState::Ready,
            ]
        );
        let session = s.conn.session();
        assert_eq!(session.server_first_reply.as_deref(), Some("220 Welcome\r\n"));
        assert_eq!(session.server_system.as_deref(), Some("215 UNIX Type: L8"));
        assert!(s.log_text().contains("PASS (hidden)"));
        assert!(!s.log_text().contains("PASS name@someserver.com"));
        assert!(!s.conn.is_encrypted());
        assert!(s.conn.peer_certificates().is_none());
    }

    #[tokio::test]
    async fn test_tls_details_travel_with_socket() {
        let s = Scripted::new(test_params());
        let (client, _server) = FakeServer::pair();
        let chain = Arc::new(vec![CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x01])]);
        s.conn.lock().socket = Some(ControlSocket::attach_with(
            client,
            ReadBuffer::new(),
            true,
            Some(chain),
        ));
        assert!(s.conn.is_encrypted());
        assert_eq!(s.conn.peer_certificates().map(|c| c.len()), Some(1));

        let worker = s.sibling();
        assert!(s.conn.give_connection_to_worker(&worker).await.unwrap());
        assert!(!s.conn.is_encrypted());
        assert!(worker.is_encrypted());
        assert_eq!(
            worker.peer_certificates().unwrap()[0].as_ref(),
            &[0x30, 0x03, 0x02, 0x01, 0x01]
        );
    }

    #[tokio::test]
    async fn test_account_and_init_commands() {
        let mut params = test_params();
        params.user = "alice".to_string();
        params.password = "secret".to_string();
        params.account = "acct1".to_string();
        params.init_commands = "SITE UMASK 022; OPTS UTF8 ON".to_string();
        let s = Scripted::new(params);
        let (client, mut server) = FakeServer::pair();
        s.connector.push(client);
        let script = tokio::spawn(async move {
            server.send("220 Welcome\r\n").await;
            server.expect("USER alice").await;
            server.send("331 Password required\r\n").await;
            server.expect("PASS secret").await;
            server.send("332 Need account\r\n").await;
            server.expect("ACCT acct1").await;
            server.send("230 Logged in\r\n").await;
            server.expect("SITE UMASK 022").await;
            server.send("500 Unknown SITE command\r\n").await;
            server.expect("OPTS UTF8 ON").await;
            server.send("200 UTF8 on\r\n").await;
            server.expect("SYST").await;
            server.send("215 UNIX\r\n").await;
            server
        });
        s.conn.start_control_connection().await.unwrap();
        let _server = script.await.unwrap();
        assert!(s.conn.connect_history().contains(&ConnectSubState::SendInitCommands));
        assert!(!s.log_text().contains("secret"));
    }

    #[tokio::test]
    async fn test_login_refused_is_not_retried() {
        let s = Scripted::new(test_params());
        let (client, mut server) = FakeServer::pair();
        s.connector.push(client);
        tokio::spawn(async move {
            server.send("220 Welcome\r\n").await;
            server.expect("USER anonymous").await;
            server.send("530 Login incorrect\r\n").await;
            server.read_line().await;
        });
        let err = s.conn.start_control_connection().await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("530 Login incorrect"));
        assert_eq!(s.connector.attempts(), 1);
        assert!(!s.conn.is_connected());
    }

    #[tokio::test]
    async fn test_busy_greeting_is_retried() {
        let s = Scripted::new(test_params());
        let (first, mut busy) = FakeServer::pair();
        let (second, mut server) = FakeServer::pair();
        s.connector.push(first);
        s.connector.push(second);
        tokio::spawn(async move {
            busy.send("421 Too many users\r\n").await;
            busy.read_line().await;
        });
        let login = tokio::spawn(async move {
            server.login().await;
            server
        });
        s.conn.start_control_connection().await.unwrap();
        let _server = login.await.unwrap();
        assert_eq!(s.connector.attempts(), 2);
        assert!(s.conn.is_connected());
    }

    #[tokio::test]
    async fn test_not_an_ftp_server() {
        let s = Scripted::new(test_params());
        let (client, mut server) = FakeServer::pair();
        s.connector.push(client);
        tokio::spawn(async move {
            server.send("SSH-2.0-OpenSSH_9.6\r\n").await;
            server.read_line().await;
        });
        let err = s.conn.start_control_connection().await.unwrap_err();
        assert_eq!(err.to_string(), "not an FTP server");
        assert_eq!(s.connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_attempts_are_bounded() {
        let s = Scripted::new(test_params());
        let err = s.conn.start_control_connection().await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), Some(FailureKind::Transport));
        // connect_retries = 2
        assert_eq!(s.connector.attempts(), 3);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(s.connector.attempts(), 3);
    }

    #[tokio::test]
    async fn test_close_before_reply_is_connection_lost() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("LIST").await;
            drop(server);
        });
        let err = s
            .conn
            .send_command(FtpCommand::LIST, None, SendOptions::default())
            .await
            .unwrap_err();
        script.await.unwrap();
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "connection lost");
        assert!(err.connection_closed());
        assert!(!s.conn.is_connected());
    }

    #[tokio::test]
    async fn test_reply_timeout_closes_connection() {
        let mut params = test_params();
        params.server_timeout = Duration::from_secs(1);
        let s = Scripted::new(params);
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("NOOP").await;
            server.read_line().await
        });
        let err = s
            .conn
            .send_command(FtpCommand::NOOP, None, SendOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "connection lost (server reply timeout)");
        assert!(!s.conn.is_connected());
        assert_eq!(script.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejected_reply_keeps_connection() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("DELE file.txt").await;
            server.send("550 No such file\r\n").await;
            server.expect("DELE other.txt").await;
            server.send("550 No such file\r\n").await;
            server
        });
        let err = s
            .conn
            .send_command(FtpCommand::DELE, Some("file.txt"), SendOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.rejected_reply().map(|r| r.code), Some(550));
        assert!(s.conn.is_connected());

        let err = s
            .conn
            .send_command(FtpCommand::DELE, Some("other.txt"), SendOptions::default().no_retry())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(Outcome::from(Err(err)), Outcome::NonRetryableFatal("550 No such file".into()));
        let _server = script.await.unwrap();
    }

    #[tokio::test]
    async fn test_unsolicited_reply_is_discarded() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        server.send("550 Permission denied\r\n").await;
        while s.conn.socket_io().unwrap().lock().read_buf.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let script = tokio::spawn(async move {
            server.expect("NOOP").await;
            server.send("200 NOOP ok\r\n").await;
            server
        });
        let reply = s
            .conn
            .send_command(FtpCommand::NOOP, None, SendOptions::default())
            .await
            .unwrap();
        assert_eq!(reply.code, 200);
        let _server = script.await.unwrap();
    }

    #[tokio::test]
    async fn test_second_command_is_busy() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        let conn = s.conn.clone();
        let first =
            tokio::spawn(async move { conn.send_command(FtpCommand::NOOP, None, SendOptions::default()).await });
        server.expect("NOOP").await;

        let err = s
            .conn
            .send_command(FtpCommand::PWD, None, SendOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::Operation));
        assert_eq!(err.to_string(), EngineError::Busy.to_string());

        server.send("200 NOOP ok\r\n").await;
        assert_eq!(first.await.unwrap().unwrap().code, 200);
    }

    #[tokio::test]
    async fn test_abort_with_urgent_data() {
        let cancel = Arc::new(CancelFlag::new());
        let s = Scripted::with_ui(test_params(), cancel.clone());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("LIST").await;
            server.send("150 Here comes the directory listing\r\n").await;
            cancel.request_cancel();
            let abort = server.read_raw_line().await.unwrap();
            assert_eq!(abort, b"\xFF\xF4ABOR".to_vec());
            assert_eq!(server.urgent_bytes(), vec![0xF2]);
            server.send("226 Abort successful\r\n").await;
            server
        });
        let err = s
            .conn
            .send_command(FtpCommand::LIST, None, SendOptions::default().abortable())
            .await
            .unwrap_err();
        let _server = script.await.unwrap();
        match err {
            CommandFailure::AbortedWithReply(reply) => assert_eq!(reply.code, 226),
            other => panic!("unexpected failure: {:?}", other),
        }
        assert!(s.conn.is_connected());
    }

    #[tokio::test]
    async fn test_abort_resent_without_urgent_data() {
        let cancel = Arc::new(CancelFlag::new());
        let s = Scripted::with_ui(test_params(), cancel.clone());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("RETR big.iso").await;
            server.send("150 Opening BINARY mode data connection\r\n").await;
            cancel.request_cancel();
            assert_eq!(server.read_raw_line().await.unwrap(), b"\xFF\xF4ABOR".to_vec());
            server.send("500 '\u{f2}ABOR': command not understood\r\n").await;
            server.expect("ABOR").await;
            server.send("426 Connection closed; transfer aborted\r\n").await;
            server.send("226 Closing data connection\r\n").await;
            server
        });
        let err = s
            .conn
            .send_command(FtpCommand::RETR, Some("big.iso"), SendOptions::default().abortable())
            .await
            .unwrap_err();
        let _server = script.await.unwrap();
        assert_eq!(err.reply().map(|r| r.code), Some(426));
        assert!(!s.conn.session().can_send_oob);
    }

    #[tokio::test]
    async fn test_cancel_without_abort_closes_connection() {
        let cancel = Arc::new(CancelFlag::new());
        let s = Scripted::with_ui(test_params(), cancel.clone());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("NOOP").await;
            cancel.request_cancel();
            server.read_line().await
        });
        let err = s
            .conn
            .send_command(FtpCommand::NOOP, None, SendOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_user_cancelled());
        assert!(!err.is_retryable());
        assert!(!s.conn.is_connected());
        assert_eq!(script.await.unwrap(), None);
        assert!(s.log_text().contains("Action canceled by user."));
    }

    #[tokio::test]
    async fn test_handoff_round_trip() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("PWD").await;
            server.send("257 \"/pub\" is the current directory\r\n").await;
            server.expect("TYPE I").await;
            server.send("200 Switching to Binary mode.\r\n").await;
            server.send("200-partial").await;
            server
        });
        assert_eq!(s.conn.get_current_working_path(false).await.unwrap(), "/pub");
        assert!(s.conn.set_current_transfer_mode(false, false).await.unwrap());
        let _server = script.await.unwrap();
        while s.conn.socket_io().unwrap().lock().read_buf.unread() != b"200-partial" {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let before = s.conn.session();

        let worker = s.sibling();
        assert!(s.conn.give_connection_to_worker(&worker).await.unwrap());
        assert!(worker.is_connected());
        assert!(!s.conn.is_connected());
        assert_eq!(worker.session().working_path.as_deref(), Some("/pub"));
        assert_eq!(worker.session().transfer_mode, TransferMode::Binary);
        // nothing left to give
        assert!(!s.conn.give_connection_to_worker(&worker).await.unwrap());

        assert!(s.conn.get_connection_from_worker(&worker).await.unwrap());
        assert!(s.conn.is_connected());
        assert!(!worker.is_connected());
        assert_eq!(s.conn.session(), before);
        assert_eq!(
            s.conn.socket_io().unwrap().lock().read_buf.unread(),
            b"200-partial"
        );
    }

    #[tokio::test]
    async fn test_close_control_connection_sends_quit() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("QUIT").await;
            server.send("221 Goodbye\r\n").await;
            server.read_line().await
        });
        s.conn.close_control_connection().await.unwrap();
        assert!(!s.conn.is_connected());
        assert_eq!(script.await.unwrap(), None);
        assert!(!s.logs.is_connected(s.conn.log_id()));
        assert!(s.log_text().contains("Disconnected."));
    }
}
