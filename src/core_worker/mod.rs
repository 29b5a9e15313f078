// Workers: background connections of a bulk operation
pub mod operation;
pub mod worker;

#[cfg(test)]
mod test_worker;

pub use operation::Operation;
pub use worker::{WorkItem, WorkReport, Worker, WorkerState};
