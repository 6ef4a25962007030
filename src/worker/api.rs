use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State as AxumState};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::Utc;
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::stats::{get_stats, SystemStats};
use super::types::{ErrResponse, TaskServer, Worker};
use crate::tasks::types::{Action, Task, TaskEvent};

impl TaskServer {
    pub fn new(worker: Arc<Mutex<Worker>>, address: &str, port: u16) -> Self {
        TaskServer {
            worker,
            address: address.to_string(),
            port,
        }
    }

    pub fn router(worker: Arc<Mutex<Worker>>) -> Router {
        Router::new()
            .route("/tasks", get(Self::get_tasks).post(Self::start_task))
            .route("/tasks/{taskID}", delete(Self::stop_task))
            .route("/stats", get(Self::get_stats))
            .with_state(worker)
    }

    pub async fn start_server(self) -> std::io::Result<()> {
        info!("starting worker API on {}:{}", self.address, self.port);
        let listener = TcpListener::bind((self.address.as_str(), self.port)).await?;
        axum::serve(listener, Self::router(self.worker)).await
    }

    async fn get_tasks(AxumState(worker): AxumState<Arc<Mutex<Worker>>>) -> Json<Vec<Task>> {
        Json(worker.lock().await.get_tasks())
    }

    async fn start_task(
        AxumState(worker): AxumState<Arc<Mutex<Worker>>>,
        payload: Result<Json<TaskEvent>, JsonRejection>,
    ) -> Response {
        let Json(event) = match payload {
            Ok(payload) => payload,
            Err(rejection) => {
                let msg = format!("error unmarshalling body: {rejection}");
                warn!("{msg}");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrResponse {
                        http_status_code: 400,
                        message: msg,
                    }),
                )
                    .into_response();
            }
        };

        let task = event.task.clone();
        worker.lock().await.add_task(event);
        info!("added task {}", task.id);
        (StatusCode::CREATED, Json(task)).into_response()
    }

    async fn stop_task(
        AxumState(worker): AxumState<Arc<Mutex<Worker>>>,
        Path(task_id): Path<String>,
    ) -> Response {
        let Ok(id) = Uuid::parse_str(&task_id) else {
            warn!("invalid task id in request: {task_id}");
            return StatusCode::BAD_REQUEST.into_response();
        };

        let mut w = worker.lock().await;
        let Some(task) = w.db.get(&id).cloned() else {
            warn!("no task with id {id} found");
            return StatusCode::NOT_FOUND.into_response();
        };

        let event = TaskEvent {
            id: Uuid::new_v4(),
            action: Action::Stop,
            timestamp: Some(Utc::now()),
            task: task.clone(),
        };
        w.add_task(event);

        info!(
            "added stop event for task {} (container {:?})",
            task.id, task.container_id
        );
        StatusCode::NO_CONTENT.into_response()
    }

    async fn get_stats(AxumState(worker): AxumState<Arc<Mutex<Worker>>>) -> Json<SystemStats> {
        let mut w = worker.lock().await;
        match w.stats.clone() {
            Some(sample) => Json(sample),
            None => {
                // First scrape can land before the sampler's first tick.
                w.sys.refresh_all();
                let sample = get_stats(&w.sys, w.db.len() as u64);
                Json(sample)
            }
        }
    }
}
