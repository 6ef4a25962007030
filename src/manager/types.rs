use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::tasks::types::{Task, TaskEvent};

/// The manager owns the authoritative task view and the placement maps.
/// `worker_task_map` and `task_worker_map` are kept exact inverses.
pub struct Manager {
    pub pending: VecDeque<TaskEvent>,
    pub task_db: HashMap<Uuid, Task>,
    pub event_db: HashMap<Uuid, TaskEvent>,
    pub workers: Vec<String>,
    pub worker_task_map: HashMap<String, Vec<Uuid>>,
    pub task_worker_map: HashMap<Uuid, String>,
    pub last_worker: usize,
    pub client: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("error connecting to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("error decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("worker response error ({code}): {message}")]
    WorkerResponse { code: u16, message: String },
    #[error("task {0} has no published host port")]
    NoHostPort(Uuid),
    #[error("health check for task {task} returned {status}")]
    Unhealthy { task: Uuid, status: u16 },
}

/// The manager's HTTP control surface, where users submit task events.
pub struct ManagerServer {
    pub manager: Arc<Mutex<Manager>>,
    pub address: String,
    pub port: u16,
}
