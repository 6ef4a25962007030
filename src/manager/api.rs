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

use super::types::{Manager, ManagerServer};
use crate::tasks::state::valid_state_transition;
use crate::tasks::types::{Action, Task, TaskEvent};
use crate::worker::types::ErrResponse;

impl ManagerServer {
    pub fn new(manager: Arc<Mutex<Manager>>, address: &str, port: u16) -> Self {
        ManagerServer {
            manager,
            address: address.to_string(),
            port,
        }
    }

    pub fn router(manager: Arc<Mutex<Manager>>) -> Router {
        Router::new()
            .route("/tasks", get(Self::get_tasks).post(Self::start_task))
            .route("/tasks/{taskID}", delete(Self::stop_task))
            .with_state(manager)
    }

    pub async fn start_server(self) -> std::io::Result<()> {
        info!("starting manager API on {}:{}", self.address, self.port);
        let listener = TcpListener::bind((self.address.as_str(), self.port)).await?;
        axum::serve(listener, Self::router(self.manager)).await
    }

    async fn get_tasks(AxumState(manager): AxumState<Arc<Mutex<Manager>>>) -> Json<Vec<Task>> {
        Json(manager.lock().await.get_tasks())
    }

    async fn start_task(
        AxumState(manager): AxumState<Arc<Mutex<Manager>>>,
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
        manager.lock().await.add_task(event);
        info!("added task {}", task.id);
        (StatusCode::CREATED, Json(task)).into_response()
    }

    async fn stop_task(
        AxumState(manager): AxumState<Arc<Mutex<Manager>>>,
        Path(task_id): Path<String>,
    ) -> Response {
        let Ok(id) = Uuid::parse_str(&task_id) else {
            warn!("invalid task id in request: {task_id}");
            return StatusCode::BAD_REQUEST.into_response();
        };

        let mut m = manager.lock().await;
        let Some(task) = m.task_db.get(&id).cloned() else {
            warn!("no task with id {id} found");
            return StatusCode::NOT_FOUND.into_response();
        };

        let event = TaskEvent {
            id: Uuid::new_v4(),
            action: Action::Stop,
            timestamp: Some(Utc::now()),
            task: task.clone(),
        };

        // Informational only; the authoritative Completed comes back from
        // the worker's lifecycle loop through reconciliation.
        if valid_state_transition(Action::Stop, task.state) {
            let mut stopped = task.clone();
            stopped.state = Action::Stop.target();
            m.task_db.insert(id, stopped);
        } else {
            warn!("unable to stop task {id} from state {:?}", task.state);
        }

        m.add_task(event);
        info!("added stop event for task {id}");
        StatusCode::NO_CONTENT.into_response()
    }
}
