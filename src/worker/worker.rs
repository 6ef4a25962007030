//! Worker core: the lifecycle loop that drains the event queue, the
//! reconciler that checks runtime reality against the task table, and the
//! stats sampler.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bollard::secret::ContainerStateStatusEnum;
use chrono::Utc;
use log::{debug, error, info, warn};
use sysinfo::System;
use tokio::sync::Mutex;
use tokio::time::sleep;

use super::stats::get_stats;
use super::types::{Worker, WorkerError};
use crate::tasks::docker::{DockerClient, DockerOutcome};
use crate::tasks::state::valid_state_transition;
use crate::tasks::types::{new_config, Action, State, Task, TaskEvent};

const QUEUE_POLL_INTERVAL: Duration = Duration::from_secs(10);
const RECONCILE_INTERVAL: Duration = Duration::from_secs(15);
const STATS_INTERVAL: Duration = Duration::from_secs(15);

impl Worker {
    pub fn new(name: &str) -> Self {
        Worker {
            name: name.to_string(),
            queue: VecDeque::new(),
            db: HashMap::new(),
            task_count: 0,
            stats: None,
            sys: System::new_all(),
        }
    }

    /// Enqueue an event for the lifecycle loop. No validation happens here;
    /// the loop checks the transition against the persisted task.
    pub fn add_task(&mut self, event: TaskEvent) {
        self.queue.push_back(event);
    }

    /// Snapshot of the local task table.
    pub fn get_tasks(&self) -> Vec<Task> {
        self.db.values().cloned().collect()
    }
}

/// Process the next queued event: locate or insert the persisted task,
/// validate the requested transition, run the container operation and
/// persist the resulting state.
pub async fn run_next(worker: &Arc<Mutex<Worker>>) -> Result<DockerOutcome, WorkerError> {
    let (action, mut task) = {
        let mut w = worker.lock().await;
        let event = w.queue.pop_front().ok_or(WorkerError::EmptyQueue)?;
        let persisted = w
            .db
            .entry(event.task.id)
            .or_insert_with(|| event.task.clone());
        if !valid_state_transition(event.action, persisted.state) {
            return Err(WorkerError::InvalidStateTransition {
                action: event.action,
                state: persisted.state,
            });
        }
        (event.action, persisted.clone())
    };

    let result = match action {
        Action::Start => start_task(&mut task).await,
        Action::Stop => stop_task(&mut task).await,
        Action::Restart => restart_task(&mut task).await,
        other => Err(WorkerError::UnsupportedAction(other)),
    };

    let mut w = worker.lock().await;
    match &result {
        Ok(_) => {
            task.state = action.target();
            w.db.insert(task.id, task);
        }
        Err(WorkerError::Docker(_)) | Err(WorkerError::MissingContainerId(_)) => {
            task.state = State::Failed;
            w.db.insert(task.id, task);
        }
        Err(_) => {}
    }
    result
}

async fn start_task(task: &mut Task) -> Result<DockerOutcome, WorkerError> {
    task.start_time = Some(Utc::now());
    let docker = DockerClient::new(new_config(task))?;
    let outcome = docker.run().await?;
    task.container_id = Some(outcome.container_id.clone());
    Ok(outcome)
}

async fn stop_task(task: &mut Task) -> Result<DockerOutcome, WorkerError> {
    let container_id = task
        .container_id
        .clone()
        .ok_or(WorkerError::MissingContainerId(task.id))?;
    let docker = DockerClient::new(new_config(task))?;
    let outcome = docker.stop(&container_id).await?;
    task.finish_time = Some(Utc::now());
    info!("stopped and removed container {container_id} for task {}", task.id);
    Ok(outcome)
}

async fn restart_task(task: &mut Task) -> Result<DockerOutcome, WorkerError> {
    task.start_time = Some(Utc::now());
    let container_id = task
        .container_id
        .clone()
        .ok_or(WorkerError::MissingContainerId(task.id))?;
    let docker = DockerClient::new(new_config(task))?;
    Ok(docker.restart(&container_id).await?)
}

/// Lifecycle loop. Errors never escape an iteration.
pub async fn run_tasks(worker: Arc<Mutex<Worker>>) {
    loop {
        if worker.lock().await.queue.is_empty() {
            debug!("no tasks to process currently");
        } else {
            match run_next(&worker).await {
                Ok(outcome) => {
                    info!("container {} {}: {}", outcome.container_id, outcome.action, outcome.result)
                }
                Err(e) => error!("error running task: {e}"),
            }
        }
        sleep(QUEUE_POLL_INTERVAL).await;
    }
}

/// Reconciler loop: inspect every Running task's container and fold runtime
/// reality back into the task table.
pub async fn update_tasks(worker: Arc<Mutex<Worker>>) {
    loop {
        debug!("checking status of tasks");
        reconcile_running_tasks(&worker).await;
        sleep(RECONCILE_INTERVAL).await;
    }
}

async fn reconcile_running_tasks(worker: &Arc<Mutex<Worker>>) {
    let running: Vec<Task> = worker
        .lock()
        .await
        .db
        .values()
        .filter(|t| t.state == State::Running)
        .cloned()
        .collect();

    for task in running {
        let inspected = inspect_task(&task).await;

        let mut w = worker.lock().await;
        let Some(persisted) = w.db.get_mut(&task.id) else {
            continue;
        };

        match inspected {
            Err(e) => {
                warn!("error inspecting container for task {}: {e}", task.id);
                persisted.state = State::Failed;
            }
            Ok(container) => {
                let status = container.state.as_ref().and_then(|s| s.status);
                if status == Some(ContainerStateStatusEnum::EXITED) {
                    info!("container for task {} is in state exited", task.id);
                    persisted.state = State::Failed;
                }
                if let Some(ports) = container.network_settings.and_then(|n| n.ports) {
                    persisted.host_ports = ports;
                }
            }
        }
    }
}

async fn inspect_task(
    task: &Task,
) -> Result<bollard::secret::ContainerInspectResponse, WorkerError> {
    let container_id = task
        .container_id
        .clone()
        .ok_or(WorkerError::MissingContainerId(task.id))?;
    let docker = DockerClient::new(new_config(task))?;
    Ok(docker.inspect(&container_id).await?)
}

/// Stats loop: overwrite the latest node sample and mirror the task count.
pub async fn collect_stats(worker: Arc<Mutex<Worker>>) {
    loop {
        {
            let mut w = worker.lock().await;
            debug!("collecting stats on {}", w.name);
            w.sys.refresh_all();
            w.task_count = w.db.len() as u64;
            let sample = get_stats(&w.sys, w.task_count);
            w.stats = Some(sample);
        }
        sleep(STATS_INTERVAL).await;
    }
}
