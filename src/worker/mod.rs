pub mod api;
pub mod stats;
pub mod types;
pub mod worker;

pub use types::{ErrResponse, TaskServer, Worker, WorkerError};
pub use worker::{collect_stats, run_tasks, update_tasks};
