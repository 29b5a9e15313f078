// Tests des workers : exécution, reprise du travail par un worker connecté, prêt de la connexion

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::core_connection::FailureKind;
    use crate::core_ftpcommand::{FtpCommand, SendOptions};
    use crate::testing::*;
    use std::time::Duration;

    async fn settle(op: &Operation) {
        tokio::time::timeout(Duration::from_secs(5), op.wait_until_done())
            .await
            .expect("operation did not settle");
    }

    #[tokio::test]
    async fn test_worker_connects_and_runs_item() {
        let s = Scripted::new(test_params());
        let (client, mut server) = FakeServer::pair();
        s.connector.push(client);
        let script = tokio::spawn(async move {
            server.login().await;
            server.expect("CWD /pub").await;
            server.send("250 OK\r\n").await;
            server.expect("PWD").await;
            server.send("257 \"/pub\"\r\n").await;
            server.expect("SITE CHMOD 644 index.html").await;
            server.send("200 SITE CHMOD command ok.\r\n").await;
            server.expect("QUIT").await;
            server.send("221 Goodbye\r\n").await;
        });

        let op = Operation::new();
        let worker = op.add_worker(s.sibling());
        let id = op.add_work("/pub", vec!["SITE CHMOD 644 index.html".to_string()]);
        settle(&op).await;

        let reports = op.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].item_id, id);
        assert_eq!(reports[0].worker_id, worker.id());
        let replies = reports[0].result.as_ref().unwrap();
        assert_eq!(replies[0].code, 200);
        assert_eq!(worker.state(), WorkerState::Sleeping);

        op.stop().await;
        script.await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(!worker.connection().is_connected());
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let s = Scripted::new(test_params());
        let op = Operation::new();
        let worker = op.add_worker(s.sibling());
        op.add_work("", vec!["NOOP".to_string()]);
        settle(&op).await;

        let reports = op.reports();
        let err = reports[0].result.as_ref().unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), Some(FailureKind::Transport));
        assert_eq!(worker.state(), WorkerState::ConnectionError);
        assert!(worker.last_error().is_some());
        // two retries after the first attempt
        assert_eq!(s.connector.attempts(), 3);
        op.stop().await;
    }

    #[tokio::test]
    async fn test_reconnecting_worker_gives_work_to_connected_one() {
        let mut params = test_params();
        params.delay_between_retries = Duration::from_millis(300);
        let s = Scripted::new(params);

        let connected = s.sibling();
        let server = logged_in_on(&connected, &s.connector).await;

        let op = Operation::new();
        let reconnecting = op.add_worker(s.sibling());
        op.add_work("", vec!["NOOP".to_string()]);
        let sleeper = op.add_worker(connected);

        let serving = tokio::spawn(server.serve(Duration::ZERO, |line| match line {
            "QUIT" => "221 Goodbye\r\n".to_string(),
            _ => "200 NOOP ok\r\n".to_string(),
        }));
        settle(&op).await;

        let reports = op.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].worker_id, sleeper.id());
        assert!(reports[0].result.is_ok());
        // login of the sleeper, then at least one failed attempt of the other worker
        assert!(s.connector.attempts() >= 2);
        assert!(!reconnecting.connection().is_connected());

        op.stop().await;
        let report = serving.await.unwrap();
        assert_eq!(report.commands, vec!["NOOP", "QUIT"]);
    }

    #[tokio::test]
    async fn test_panel_connection_is_lent_and_returned() {
        let s = Scripted::new(test_params());
        let mut server = logged_in(&s).await;
        let script = tokio::spawn(async move {
            server.expect("NOOP").await;
            server.send("200 NOOP ok\r\n").await;
            server.expect("PWD").await;
            server.send("257 \"/\"\r\n").await;
            server
        });

        let op = Operation::new();
        let worker = op.add_worker(s.sibling());
        settle(&op).await;

        assert!(op.give_panel_connection(&s.conn).await.unwrap());
        assert!(!s.conn.is_connected());
        assert!(worker.connection().is_connected());

        op.add_work("", vec!["NOOP".to_string()]);
        settle(&op).await;
        assert!(op.reports()[0].result.is_ok());
        // the socket was borrowed, not dialed
        assert_eq!(s.connector.attempts(), 1);

        assert!(op.take_connection_for_panel(&s.conn).await.unwrap());
        assert!(s.conn.is_connected());
        assert!(!worker.connection().is_connected());
        s.conn
            .send_command(FtpCommand::PWD, None, SendOptions::default())
            .await
            .unwrap();
        let _server = script.await.unwrap();

        // nothing left to lend
        assert!(!op.take_connection_for_panel(&s.conn).await.unwrap());
        op.stop().await;
    }
}
