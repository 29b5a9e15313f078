// Tests des commandes de haut niveau : répertoire courant, cache des listes et mode de transfert

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::core_cache::ServerPathType;
    use crate::core_connection::FailureKind;
    use crate::session::TransferMode;
    use crate::testing::*;
    use std::time::Duration;

    const LISTING: &[u8] = b"drwxr-xr-x 2 ftp ftp 4096 Jan 05 12:00 linux\r\n";

    #[tokio::test]
    async fn test_cached_listing_needs_no_connection() {
        let s = Scripted::new(test_params());
        s.conn
            .cache_path_listing(ServerPathType::Unix, "/pub", LISTING.to_vec())
            .await;

        let change = s.conn.change_working_path("/pub", false).await.unwrap();
        assert_eq!(change.path, "/pub");
        assert_eq!(change.path_type, ServerPathType::Unix);
        assert_eq!(change.cached_listing.unwrap().listing, LISTING);
        assert!(change.reply.is_none());
        assert_eq!(s.connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_cache_hit_sends_nothing() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        s.conn
            .cache_path_listing(ServerPathType::Unix, "/pub", LISTING.to_vec())
            .await;

        let change = s.conn.change_working_path("/pub/", false).await.unwrap();
        assert!(change.cached_listing.is_some());
        assert_eq!(change.path, "/pub");
        assert!(!server.has_more_within(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_change_path_with_cwd_and_pwd() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("CWD /pub/linux").await;
            server.send("250 Directory successfully changed.\r\n").await;
            server.expect("PWD").await;
            server.send("257 \"/pub/linux\" is the current directory\r\n").await;
            server
        });
        let change = s.conn.change_working_path("/pub/linux", false).await.unwrap();
        let _server = script.await.unwrap();
        assert_eq!(change.path, "/pub/linux");
        assert!(!change.path_was_cut);
        assert!(change.cached_listing.is_none());
        assert_eq!(change.reply.map(|r| r.code), Some(250));
        assert_eq!(s.conn.session().working_path.as_deref(), Some("/pub/linux"));
    }

    #[tokio::test]
    async fn test_inaccessible_directory_is_cut() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("CWD /pub/secret").await;
            server.send("550 Failed to change directory.\r\n").await;
            server.expect("CWD /pub").await;
            server.send("250 Directory successfully changed.\r\n").await;
            server.expect("PWD").await;
            server.send("257 \"/pub\"\r\n").await;
            server
        });
        let change = s.conn.change_working_path("/pub/secret", false).await.unwrap();
        let _server = script.await.unwrap();
        assert_eq!(change.path, "/pub");
        assert!(change.path_was_cut);
        assert!(s.conn.is_connected());
    }

    #[tokio::test]
    async fn test_canonical_path_is_looked_up_again() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        s.conn
            .cache_path_listing(ServerPathType::Unix, "/etc", LISTING.to_vec())
            .await;
        let script = tokio::spawn(async move {
            server.expect("CWD /pub/../etc").await;
            server.send("250 OK\r\n").await;
            server.expect("PWD").await;
            server.send("257 \"/etc\"\r\n").await;
            server
        });
        let change = s.conn.change_working_path("/pub/../etc", false).await.unwrap();
        let _server = script.await.unwrap();
        assert_eq!(change.path, "/etc");
        assert!(change.cached_listing.is_some());
    }

    #[tokio::test]
    async fn test_force_refresh_skips_cache() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        s.conn
            .cache_path_listing(ServerPathType::Unix, "/pub", LISTING.to_vec())
            .await;
        let script = tokio::spawn(async move {
            server.expect("CWD /pub").await;
            server.send("250 OK\r\n").await;
            server.expect("PWD").await;
            server.send("257 \"/pub\"\r\n").await;
            server
        });
        let change = s.conn.change_working_path("/pub", true).await.unwrap();
        let _server = script.await.unwrap();
        assert!(change.cached_listing.is_none());
        assert!(s.log_text().contains("CWD /pub"));
    }

    #[tokio::test]
    async fn test_empty_path_uses_current_directory() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("PWD").await;
            server.send("257 \"/home/ftp\"\r\n").await;
            server
        });
        let change = s.conn.change_working_path("", false).await.unwrap();
        let mut server = script.await.unwrap();
        assert_eq!(change.path, "/home/ftp");
        assert_eq!(change.path_type, ServerPathType::Unix);
        assert!(change.reply.is_none());
        assert!(!server.has_more_within(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_working_path_is_cached() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("PWD").await;
            server.send("257 \"/pub\"\r\n").await;
            server.expect("PWD").await;
            server.send("550 PWD not allowed\r\n").await;
            server
        });
        assert_eq!(s.conn.get_current_working_path(false).await.unwrap(), "/pub");
        assert_eq!(s.conn.get_current_working_path(false).await.unwrap(), "/pub");
        assert_eq!(s.conn.get_current_working_path(true).await.unwrap(), "");
        let _server = script.await.unwrap();
        assert_eq!(s.conn.session().working_path.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_unparsable_pwd_reply_closes_connection() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("PWD").await;
            server.send("257 current directory unknown\r\n").await;
            server.read_line().await
        });
        let err = s.conn.get_current_working_path(true).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), Some(FailureKind::Protocol));
        assert!(err.connection_closed());
        assert!(!s.conn.is_connected());
        assert_eq!(script.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transfer_mode_is_cached() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("TYPE A").await;
            server.send("200 Switching to ASCII mode.\r\n").await;
            server.expect("TYPE A").await;
            server.send("200 Switching to ASCII mode.\r\n").await;
            server.expect("TYPE I").await;
            server.send("504 Command not implemented for that parameter.\r\n").await;
            server
        });
        assert!(s.conn.set_current_transfer_mode(true, false).await.unwrap());
        assert_eq!(s.conn.session().transfer_mode, TransferMode::Ascii);
        // cached, nothing sent
        assert!(s.conn.set_current_transfer_mode(true, false).await.unwrap());
        assert!(s.conn.set_current_transfer_mode(true, true).await.unwrap());
        assert!(!s.conn.set_current_transfer_mode(false, false).await.unwrap());
        assert_eq!(s.conn.session().transfer_mode, TransferMode::Unknown);
        let _server = script.await.unwrap();
    }

    #[tokio::test]
    async fn test_raw_command_and_cache_reset() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("PWD").await;
            server.send("257 \"/pub\"\r\n").await;
            server.expect("site chmod 644 index.html").await;
            server.send("200 SITE CHMOD command ok.\r\n").await;
            server
        });
        s.conn.get_current_working_path(false).await.unwrap();
        let reply = s
            .conn
            .send_raw_command(
                "site chmod 644 index.html",
                SendOptions::default().resets_working_path().resets_transfer_mode(),
            )
            .await
            .unwrap();
        let _server = script.await.unwrap();
        assert_eq!(reply.code, 200);
        assert_eq!(s.conn.session().working_path, None);
        assert_eq!(s.conn.session().transfer_mode, TransferMode::Unknown);
    }

    #[tokio::test]
    async fn test_typed_cwd_and_type_reset_caches() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("PWD").await;
            server.send("257 \"/pub\"\r\n").await;
            server.expect("TYPE I").await;
            server.send("200 Switching to Binary mode.\r\n").await;
            server.expect("cwd /etc").await;
            server.send("250 Directory successfully changed.\r\n").await;
            server.expect("TYPE A").await;
            server.send("200 Switching to ASCII mode.\r\n").await;
            server.expect("PWD").await;
            server.send("257 \"/etc\"\r\n").await;
            server
        });
        assert_eq!(s.conn.get_current_working_path(false).await.unwrap(), "/pub");
        assert!(s.conn.set_current_transfer_mode(false, false).await.unwrap());

        s.conn
            .send_raw_command("cwd /etc", SendOptions::default())
            .await
            .unwrap();
        assert_eq!(s.conn.session().working_path, None);
        assert_eq!(s.conn.session().transfer_mode, TransferMode::Binary);
        s.conn
            .send_raw_command("TYPE A", SendOptions::default())
            .await
            .unwrap();
        assert_eq!(s.conn.session().transfer_mode, TransferMode::Unknown);

        // asked again, not answered from the stale cache
        assert_eq!(s.conn.get_current_working_path(false).await.unwrap(), "/etc");
        let _server = script.await.unwrap();
    }

    #[tokio::test]
    async fn test_cache_disabled_drops_listings() {
        let mut params = test_params();
        params.use_listings_cache = false;
        let s = Scripted::new(params);
        s.conn
            .cache_path_listing(ServerPathType::Unix, "/pub", LISTING.to_vec())
            .await;
        assert!(s.conn.ctx().cache.is_empty().await);
    }
}
