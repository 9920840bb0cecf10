//! The worker runtime harness: the library every worker binary links
//! against, plus the subprocess-launching logic shared by the manager and
//! the scheduler.

pub mod error;
pub mod launch;
pub mod worker;

pub use error::WorkerError;
pub use launch::launch;
pub use worker::{ManagerHandle, NowcastWorker, Outcome};
