use crate::core_connection::establish::AttemptOutcome;
use crate::core_connection::{CommandFailure, ControlConnection, FailureDetail, FailureKind};
use crate::core_ftpcommand::SendOptions;
use crate::core_reply::Reply;
use crate::core_worker::operation::OperationShared;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};

/// Where a worker stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    LookingForWork,
    /// Nothing to do. The connection, if any, stays open.
    Sleeping,
    Preparing,
    Connecting,
    WaitingForReconnect,
    /// The last connect failed for good. The worker still accepts work.
    ConnectionError,
    Working,
    Stopped,
}

/// One unit of work: enter `path` and send `commands` there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: u64,
    pub path: String,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkReport {
    pub item_id: u64,
    pub worker_id: usize,
    pub result: Result<Vec<Reply>, CommandFailure>,
}

#[derive(Debug)]
struct WorkerShared {
    state: WorkerState,
    item: Option<WorkItem>,
    last_error: Option<String>,
}

enum Connected {
    Yes(WorkItem),
    /// The item went to another worker.
    HandedOver,
    Failed(WorkItem, CommandFailure),
}

/// A background connection that executes work items from its operation.
pub struct Worker {
    id: usize,
    conn: ControlConnection,
    shared: Mutex<WorkerShared>,
    wake: Notify,
}

impl Worker {
    pub(crate) fn new(id: usize, conn: ControlConnection) -> Self {
        Self {
            id,
            conn,
            shared: Mutex::new(WorkerShared {
                state: WorkerState::LookingForWork,
                item: None,
                last_error: None,
            }),
            wake: Notify::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn connection(&self) -> &ControlConnection {
        &self.conn
    }

    pub fn state(&self) -> WorkerState {
        self.lock().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// True when the worker holds no item and waits for one.
    pub fn is_idle(&self) -> bool {
        let shared = self.lock();
        shared.item.is_none()
            && matches!(
                shared.state,
                WorkerState::Sleeping | WorkerState::ConnectionError | WorkerState::Stopped
            )
    }

    fn lock(&self) -> MutexGuard<'_, WorkerShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, op: &OperationShared, state: WorkerState) {
        self.lock().state = state;
        op.state_changed();
    }

    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    /// Hands `item` to this worker if it sleeps on an open connection.
    /// The item comes back otherwise.
    pub(crate) fn take_work(&self, item: WorkItem) -> Result<(), WorkItem> {
        {
            let mut shared = self.lock();
            if shared.state != WorkerState::Sleeping
                || shared.item.is_some()
                || !self.conn.is_connected()
            {
                return Err(item);
            }
            shared.state = WorkerState::Preparing;
            shared.item = Some(item);
        }
        self.wake();
        Ok(())
    }

    fn next_item(&self, op: &OperationShared) -> Option<WorkItem> {
        let own = self.lock().item.take();
        let item = own.or_else(|| op.pop_work())?;
        self.set_state(op, WorkerState::Preparing);
        Some(item)
    }

    /// Goes to sleep unless an item arrived meanwhile.
    fn fall_asleep(&self, op: &OperationShared) -> bool {
        let asleep = {
            let mut shared = self.lock();
            if shared.item.is_none() && !op.has_work() {
                if shared.state != WorkerState::ConnectionError || self.conn.is_connected() {
                    shared.state = WorkerState::Sleeping;
                }
                true
            } else {
                false
            }
        };
        op.state_changed();
        asleep
    }

    pub(crate) async fn run(self: Arc<Self>, op: Arc<OperationShared>) {
        debug!("Worker {} started", self.id);
        while !op.is_stopping() {
            let Some(item) = self.next_item(&op) else {
                if self.fall_asleep(&op) {
                    self.wake.notified().await;
                }
                continue;
            };

            let item = if self.conn.is_connected() {
                item
            } else {
                match self.connect(&op, item).await {
                    Connected::Yes(item) => item,
                    Connected::HandedOver => continue,
                    Connected::Failed(item, failure) => {
                        warn!("Worker {}: {}", self.id, failure);
                        {
                            let mut shared = self.lock();
                            shared.state = WorkerState::ConnectionError;
                            shared.last_error = Some(failure.to_string());
                        }
                        op.report(WorkReport {
                            item_id: item.id,
                            worker_id: self.id,
                            result: Err(failure),
                        });
                        continue;
                    }
                }
            };

            self.set_state(&op, WorkerState::Working);
            let result = self.process(&item).await;
            if let Err(e) = &result {
                self.lock().last_error = Some(e.to_string());
            }
            op.report(WorkReport {
                item_id: item.id,
                worker_id: self.id,
                result,
            });
            self.set_state(&op, WorkerState::LookingForWork);
        }

        if self.conn.is_connected() {
            if let Err(e) = self.conn.close_control_connection().await {
                debug!("Worker {}: close failed: {}", self.id, e);
            }
        }
        self.set_state(&op, WorkerState::Stopped);
        debug!("Worker {} stopped", self.id);
    }

    /// Connect loop of a worker. Before each wait for a reconnect the item
    /// is offered to a sleeping worker that is still connected.
    async fn connect(&self, op: &OperationShared, mut item: WorkItem) -> Connected {
        let params = self.conn.params();
        let max_attempts = params.connect_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.set_state(op, WorkerState::Connecting);
            let outcome = {
                let _guard = self.conn.inner.command_guard.lock().await;
                self.conn.connect_attempt().await
            };
            let message = match outcome {
                AttemptOutcome::Connected => return Connected::Yes(item),
                AttemptOutcome::Fatal(e) => {
                    self.conn.close_socket();
                    self.conn.release_keep_alive();
                    return Connected::Failed(item, e);
                }
                AttemptOutcome::Retry(message) => {
                    self.conn.close_socket();
                    self.conn.release_keep_alive();
                    message
                }
            };
            if attempt >= max_attempts {
                return Connected::Failed(
                    item,
                    CommandFailure::NonRetryableFatal(
                        FailureDetail::new(FailureKind::Transport, message).closed(),
                    ),
                );
            }

            match op.give_work_to_sleeping_con_worker(self.id, item) {
                Ok(target) => {
                    info!("Worker {}: work moved to connected worker {}", self.id, target);
                    self.set_state(op, WorkerState::LookingForWork);
                    return Connected::HandedOver;
                }
                Err(back) => item = back,
            }

            self.set_state(op, WorkerState::WaitingForReconnect);
            self.conn.log_message(&format!(
                "Waiting {} seconds before the next attempt ({} of {}).\r\n",
                params.delay_between_retries.as_secs(),
                attempt + 1,
                max_attempts
            ));
            if !self.wait_for_reconnect(op, params.delay_between_retries).await {
                return Connected::Failed(
                    item,
                    CommandFailure::fatal(FailureKind::UserCancelled, "operation stopped"),
                );
            }
        }
    }

    /// False when the operation was stopped during the wait.
    async fn wait_for_reconnect(&self, op: &OperationShared, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline {
            tokio::select! {
                _ = sleep_until(deadline) => {}
                _ = self.wake.notified() => {}
            }
            if op.is_stopping() {
                return false;
            }
        }
        !op.is_stopping()
    }

    async fn process(&self, item: &WorkItem) -> Result<Vec<Reply>, CommandFailure> {
        if !item.path.is_empty() {
            let change = self.conn.change_working_path(&item.path, false).await?;
            if change.path_was_cut {
                return Err(CommandFailure::fatal(
                    FailureKind::Operation,
                    format!("Cannot change to path {}", item.path),
                ));
            }
        }
        let mut replies = Vec::with_capacity(item.commands.len());
        for command in &item.commands {
            replies.push(
                self.conn
                    .send_raw_command(command, SendOptions::default())
                    .await?,
            );
        }
        Ok(replies)
    }
}
