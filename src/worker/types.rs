use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::stats::SystemStats;
use crate::tasks::docker::DockerError;
use crate::tasks::types::{Action, State, Task, TaskEvent};

/// A worker owns the tasks placed on its node: a FIFO event queue and the
/// authoritative local task table.
pub struct Worker {
    pub name: String,
    pub queue: VecDeque<TaskEvent>,
    pub db: HashMap<Uuid, Task>,
    pub task_count: u64,
    pub stats: Option<SystemStats>,
    pub sys: sysinfo::System,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("no tasks in the queue")]
    EmptyQueue,
    #[error("invalid transition: {action:?} not allowed from {state:?}")]
    InvalidStateTransition { action: Action, state: State },
    #[error("action {0:?} is not handled by the worker")]
    UnsupportedAction(Action),
    #[error("task {0} has no container id")]
    MissingContainerId(Uuid),
    #[error(transparent)]
    Docker(#[from] DockerError),
}

/// The worker's HTTP control surface, scraped by the manager.
pub struct TaskServer {
    pub worker: Arc<Mutex<Worker>>,
    pub address: String,
    pub port: u16,
}

/// Error envelope returned by both control surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrResponse {
    #[serde(rename = "HTTPStatusCode")]
    pub http_status_code: u16,
    #[serde(rename = "Message")]
    pub message: String,
}
