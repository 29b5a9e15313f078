use crate::core_connection::{CommandFailure, ControlConnection};
use crate::core_worker::worker::{WorkItem, WorkReport, Worker, WorkerState};
use log::{debug, info};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const PROGRESS_POLL: Duration = Duration::from_millis(50);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Queue, workers and reports of one operation.
pub(crate) struct OperationShared {
    queue: Mutex<VecDeque<WorkItem>>,
    workers: Mutex<Vec<Arc<Worker>>>,
    reports: Mutex<Vec<WorkReport>>,
    stopping: AtomicBool,
    next_id: AtomicU64,
    progress: Notify,
}

impl OperationShared {
    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub(crate) fn pop_work(&self) -> Option<WorkItem> {
        lock(&self.queue).pop_front()
    }

    pub(crate) fn has_work(&self) -> bool {
        !lock(&self.queue).is_empty()
    }

    pub(crate) fn state_changed(&self) {
        self.progress.notify_waiters();
    }

    pub(crate) fn report(&self, report: WorkReport) {
        lock(&self.reports).push(report);
        self.state_changed();
    }

    fn workers(&self) -> Vec<Arc<Worker>> {
        lock(&self.workers).clone()
    }

    /// Moves `item` from the reconnecting worker `source` to a worker that
    /// sleeps on an open connection. Returns the id of the new owner, or the
    /// item when no such worker exists.
    pub(crate) fn give_work_to_sleeping_con_worker(
        &self,
        source: usize,
        mut item: WorkItem,
    ) -> Result<usize, WorkItem> {
        for worker in self.workers() {
            if worker.id() == source {
                continue;
            }
            match worker.take_work(item) {
                Ok(()) => return Ok(worker.id()),
                Err(back) => item = back,
            }
        }
        Err(item)
    }
}

/// A pool of worker connections running a bulk operation.
///
/// Work items are queued and picked up by whichever worker is free. The
/// panel connection can lend its live socket to an idle worker and take a
/// socket back once the operation is done.
pub struct Operation {
    shared: Arc<OperationShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Operation {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(OperationShared {
                queue: Mutex::new(VecDeque::new()),
                workers: Mutex::new(Vec::new()),
                reports: Mutex::new(Vec::new()),
                stopping: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                progress: Notify::new(),
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Starts a worker on `conn`. Must be called inside a tokio runtime.
    pub fn add_worker(&self, conn: ControlConnection) -> Arc<Worker> {
        let worker = {
            let mut workers = lock(&self.shared.workers);
            let worker = Arc::new(Worker::new(workers.len() + 1, conn));
            workers.push(Arc::clone(&worker));
            worker
        };
        let handle = tokio::spawn(Arc::clone(&worker).run(Arc::clone(&self.shared)));
        lock(&self.handles).push(handle);
        debug!("Worker {} added", worker.id());
        worker
    }

    /// Queues a work item and wakes the workers. Returns the item id.
    pub fn add_work(&self, path: impl Into<String>, commands: Vec<String>) -> u64 {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.shared.queue).push_back(WorkItem {
            id,
            path: path.into(),
            commands,
        });
        for worker in self.shared.workers() {
            worker.wake();
        }
        id
    }

    pub fn workers(&self) -> Vec<Arc<Worker>> {
        self.shared.workers()
    }

    pub fn reports(&self) -> Vec<WorkReport> {
        lock(&self.shared.reports).clone()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers().iter().map(|w| w.state()).collect()
    }

    /// True when the queue is empty and no worker holds an item.
    pub fn is_done(&self) -> bool {
        !self.shared.has_work() && self.workers().iter().all(|w| w.is_idle())
    }

    pub async fn wait_until_done(&self) {
        while !self.is_done() {
            let _ = tokio::time::timeout(PROGRESS_POLL, self.shared.progress.notified()).await;
        }
    }

    /// Lends the panel's live connection to an idle, disconnected worker.
    /// Returns false when no worker could take it.
    pub async fn give_panel_connection(
        &self,
        panel: &ControlConnection,
    ) -> Result<bool, CommandFailure> {
        let candidate = self
            .workers()
            .into_iter()
            .find(|w| w.is_idle() && !w.connection().is_connected());
        let Some(worker) = candidate else {
            return Ok(false);
        };
        let moved = panel.give_connection_to_worker(worker.connection()).await?;
        if moved {
            info!("Panel connection given to worker {}", worker.id());
            worker.wake();
        }
        Ok(moved)
    }

    /// Takes a live connection back from a sleeping worker.
    pub async fn take_connection_for_panel(
        &self,
        panel: &ControlConnection,
    ) -> Result<bool, CommandFailure> {
        let candidate = self
            .workers()
            .into_iter()
            .find(|w| w.state() == WorkerState::Sleeping && w.connection().is_connected());
        let Some(worker) = candidate else {
            return Ok(false);
        };
        let moved = panel.get_connection_from_worker(worker.connection()).await?;
        if moved {
            info!("Panel connection taken back from worker {}", worker.id());
        }
        Ok(moved)
    }

    /// Stops every worker and closes their connections.
    pub async fn stop(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        for worker in self.shared.workers() {
            worker.wake();
        }
        let handles: Vec<_> = lock(&self.handles).drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                debug!("Worker task ended abnormally: {}", e);
            }
        }
    }
}
