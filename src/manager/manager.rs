//! Manager core: round-robin scheduling, worker state reconciliation and
//! the health-check/restart policy.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bollard::secret::PortMap;
use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio::time::sleep;
use uuid::Uuid;

use super::types::{Manager, ManagerError};
use crate::tasks::types::{Action, State, Task, TaskEvent};
use crate::worker::types::ErrResponse;

const SCHEDULE_INTERVAL: Duration = Duration::from_secs(10);
const UPDATE_INTERVAL: Duration = Duration::from_secs(10);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Automatic restarts per task are bounded; beyond this a task stays
/// Failed until external intervention.
const MAX_RESTARTS: u32 = 3;

/// Health-check work gathered under the lock, probed outside it.
pub(crate) enum HealthWork {
    Probe { task: Task, worker: String },
    Restart(Uuid),
}

impl Manager {
    pub fn new(workers: Vec<String>) -> Self {
        let mut worker_task_map = HashMap::new();
        for worker in &workers {
            worker_task_map.insert(worker.clone(), Vec::new());
        }

        Manager {
            pending: VecDeque::new(),
            task_db: HashMap::new(),
            event_db: HashMap::new(),
            workers,
            worker_task_map,
            task_worker_map: HashMap::new(),
            last_worker: 0,
            client: reqwest::Client::new(),
        }
    }

    /// Enqueue a user-submitted event on the pending queue.
    pub fn add_task(&mut self, event: TaskEvent) {
        self.pending.push_back(event);
    }

    /// Snapshot of the aggregate task view.
    pub fn get_tasks(&self) -> Vec<Task> {
        self.task_db.values().cloned().collect()
    }

    /// Strict round-robin over the static worker list.
    pub fn select_worker(&mut self) -> String {
        self.last_worker = (self.last_worker + 1) % self.workers.len();
        self.workers[self.last_worker].clone()
    }

    /// Record the placement of a fresh event: event and task persisted, both
    /// placement maps updated, task marked Scheduled. Returns the chosen
    /// worker.
    pub(crate) fn place_event(&mut self, event: &TaskEvent) -> String {
        let worker = self.select_worker();
        let mut task = event.task.clone();

        self.event_db.insert(event.id, event.clone());
        self.worker_task_map
            .entry(worker.clone())
            .or_default()
            .push(task.id);
        self.task_worker_map.insert(task.id, worker.clone());

        task.state = State::Scheduled;
        self.task_db.insert(task.id, task);
        worker
    }

    /// Mark a task for restart: Scheduled, bumped restart count, and a fresh
    /// Restart event addressed to the task's current worker.
    pub(crate) fn mark_for_restart(&mut self, id: Uuid) -> Option<(String, TaskEvent)> {
        let worker = self.task_worker_map.get(&id)?.clone();
        let task = self.task_db.get_mut(&id)?;
        task.state = State::Scheduled;
        task.restart_count += 1;

        let event = TaskEvent {
            id: Uuid::new_v4(),
            action: Action::Restart,
            timestamp: Some(Utc::now()),
            task: task.clone(),
        };
        Some((worker, event))
    }

    pub(crate) fn health_check_candidates(&self) -> Vec<HealthWork> {
        let mut work = Vec::new();
        for task in self.task_db.values() {
            if task.restart_count >= MAX_RESTARTS {
                continue;
            }
            match task.state {
                State::Running if task.health_check.is_some() => {
                    if let Some(worker) = self.task_worker_map.get(&task.id) {
                        work.push(HealthWork::Probe {
                            task: task.clone(),
                            worker: worker.clone(),
                        });
                    }
                }
                State::Failed => work.push(HealthWork::Restart(task.id)),
                _ => {}
            }
        }
        work
    }
}

/// Scheduling loop: one placement per iteration, so worker selection is
/// strictly serialized.
pub async fn process_tasks(manager: Arc<Mutex<Manager>>) {
    loop {
        debug!("processing any tasks in the queue");
        send_work(&manager).await;
        sleep(SCHEDULE_INTERVAL).await;
    }
}

/// Pop one pending event, route it to a worker and dispatch it. Transport
/// failures re-enqueue the event at the tail; a non-201 response drops it.
pub async fn send_work(manager: &Arc<Mutex<Manager>>) {
    let (client, worker, event) = {
        let mut m = manager.lock().await;
        let Some(event) = m.pending.pop_front() else {
            debug!("no work in the queue");
            return;
        };
        info!("pulled event {} off pending queue", event.id);

        if let Some(worker) = m.task_worker_map.get(&event.task.id).cloned() {
            // Already placed: stop and restart events go to the task's
            // current worker, never through selection again.
            (m.client.clone(), worker, event)
        } else if event.action == Action::Stop {
            warn!(
                "dropping stop event {} for unplaced task {}",
                event.id, event.task.id
            );
            return;
        } else {
            if m.workers.is_empty() {
                error!("no workers registered, dropping event {}", event.id);
                return;
            }
            let worker = m.place_event(&event);

            // The manager consumes Schedule itself; the worker is told to
            // start the now-Scheduled task.
            let mut dispatched = event;
            dispatched.action = Action::Start;
            dispatched.task.state = State::Scheduled;
            (m.client.clone(), worker, dispatched)
        }
    };

    match dispatch_event(&client, &worker, &event).await {
        Ok(task) => info!("worker {worker} accepted task {}", task.id),
        Err(ManagerError::Transport { url, source }) => {
            warn!("error connecting to {url}: {source}");
            manager.lock().await.pending.push_back(event);
        }
        Err(e) => error!("error dispatching event {}: {e}", event.id),
    }
}

async fn dispatch_event(
    client: &reqwest::Client,
    worker: &str,
    event: &TaskEvent,
) -> Result<Task, ManagerError> {
    let url = format!("http://{worker}/tasks");
    let resp = client
        .post(&url)
        .timeout(REQUEST_TIMEOUT)
        .json(event)
        .send()
        .await
        .map_err(|source| ManagerError::Transport {
            url: url.clone(),
            source,
        })?;

    if resp.status() != reqwest::StatusCode::CREATED {
        let err: ErrResponse = resp.json().await.map_err(|source| ManagerError::Decode {
            url: url.clone(),
            source,
        })?;
        return Err(ManagerError::WorkerResponse {
            code: err.http_status_code,
            message: err.message,
        });
    }

    resp.json::<Task>()
        .await
        .map_err(|source| ManagerError::Decode { url, source })
}

/// Reconciliation loop: pull every worker's task list and merge the
/// observed fields into the manager's view.
pub async fn update_tasks(manager: Arc<Mutex<Manager>>) {
    loop {
        debug!("checking for task updates from workers");
        update_tasks_once(&manager).await;
        sleep(UPDATE_INTERVAL).await;
    }
}

async fn update_tasks_once(manager: &Arc<Mutex<Manager>>) {
    let (client, workers) = {
        let m = manager.lock().await;
        (m.client.clone(), m.workers.clone())
    };

    for worker in workers {
        debug!("checking worker {worker} for task updates");
        let tasks = match fetch_worker_tasks(&client, &worker).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };

        let mut m = manager.lock().await;
        for task in tasks {
            let Some(local) = m.task_db.get_mut(&task.id) else {
                // No implicit adoption of tasks this manager never placed.
                debug!("worker {worker} reported unknown task {}", task.id);
                continue;
            };
            local.state = task.state;
            local.start_time = task.start_time;
            local.finish_time = task.finish_time;
            local.container_id = task.container_id;
            local.host_ports = task.host_ports;
        }
    }
}

async fn fetch_worker_tasks(
    client: &reqwest::Client,
    worker: &str,
) -> Result<Vec<Task>, ManagerError> {
    let url = format!("http://{worker}/tasks");
    let resp = client
        .get(&url)
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await
        .map_err(|source| ManagerError::Transport {
            url: url.clone(),
            source,
        })?;

    if resp.status() != reqwest::StatusCode::OK {
        let err: ErrResponse = resp.json().await.map_err(|source| ManagerError::Decode {
            url: url.clone(),
            source,
        })?;
        return Err(ManagerError::WorkerResponse {
            code: err.http_status_code,
            message: err.message,
        });
    }

    resp.json::<Vec<Task>>()
        .await
        .map_err(|source| ManagerError::Decode { url, source })
}

/// Health-check loop: probe Running tasks with a health check URL, restart
/// Failed tasks, both bounded by the restart policy.
pub async fn do_health_checks(manager: Arc<Mutex<Manager>>) {
    loop {
        info!("performing task health checks");
        do_health_checks_once(&manager).await;
        sleep(HEALTH_CHECK_INTERVAL).await;
    }
}

async fn do_health_checks_once(manager: &Arc<Mutex<Manager>>) {
    let (client, work) = {
        let m = manager.lock().await;
        (m.client.clone(), m.health_check_candidates())
    };

    for item in work {
        match item {
            HealthWork::Probe { task, worker } => {
                if let Err(e) = check_task_health(&client, &task, &worker).await {
                    warn!("health check failed for task {}: {e}", task.id);
                    restart_task(manager, task.id).await;
                }
            }
            HealthWork::Restart(id) => restart_task(manager, id).await,
        }
    }
}

async fn check_task_health(
    client: &reqwest::Client,
    task: &Task,
    worker: &str,
) -> Result<(), ManagerError> {
    let path = task.health_check.as_deref().unwrap_or("/");
    let host = worker.split(':').next().unwrap_or(worker);
    let host_port = first_host_port(&task.host_ports).ok_or(ManagerError::NoHostPort(task.id))?;
    let url = format!("http://{host}:{host_port}{path}");

    debug!("calling health check for task {}: {url}", task.id);
    let resp = client
        .get(&url)
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await
        .map_err(|source| ManagerError::Transport {
            url: url.clone(),
            source,
        })?;

    if resp.status() != reqwest::StatusCode::OK {
        return Err(ManagerError::Unhealthy {
            task: task.id,
            status: resp.status().as_u16(),
        });
    }
    Ok(())
}

fn first_host_port(ports: &PortMap) -> Option<String> {
    ports
        .values()
        .flatten()
        .flatten()
        .find_map(|binding| binding.host_port.clone())
}

async fn restart_task(manager: &Arc<Mutex<Manager>>, id: Uuid) {
    let (client, worker, event) = {
        let mut m = manager.lock().await;
        let Some((worker, event)) = m.mark_for_restart(id) else {
            warn!("cannot restart task {id}: unknown task or placement");
            return;
        };
        (m.client.clone(), worker, event)
    };

    match dispatch_event(&client, &worker, &event).await {
        Ok(task) => info!("worker {worker} accepted restart of task {}", task.id),
        Err(ManagerError::Transport { url, source }) => {
            warn!("error connecting to {url}: {source}");
            manager.lock().await.pending.push_back(event);
        }
        Err(e) => error!("error restarting task {id}: {e}"),
    }
}
