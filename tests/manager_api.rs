//! Manager control surface tests, driven over HTTP against the real
//! router on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use uuid::Uuid;

use cube::manager::{Manager, ManagerServer};
use cube::tasks::types::{Action, State, Task};

async fn spawn_manager_api() -> (SocketAddr, Arc<Mutex<Manager>>) {
    let manager = Arc::new(Mutex::new(Manager::new(vec!["worker-a:5555".to_string()])));
    let app = ManagerServer::router(manager.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, manager)
}

#[tokio::test]
async fn post_task_lands_on_the_pending_queue() {
    let (addr, manager) = spawn_manager_api().await;
    let task_id = Uuid::new_v4();

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/tasks"))
        .json(&json!({
            "Action": "Schedule",
            "Task": { "ID": task_id, "Name": "web", "Image": "strm/helloworld-http" }
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    let echoed: Task = resp.json().await.unwrap();
    assert_eq!(echoed.id, task_id);
    assert_eq!(echoed.state, State::Pending);

    let m = manager.lock().await;
    assert_eq!(m.pending.len(), 1);
    assert_eq!(m.pending.front().unwrap().action, Action::Schedule);
}

#[tokio::test]
async fn post_with_unknown_fields_is_a_400_with_envelope() {
    let (addr, manager) = spawn_manager_api().await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/tasks"))
        .json(&json!({ "Action": "Schedule", "Nope": true, "Task": {} }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let envelope: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(envelope["HTTPStatusCode"], 400);

    assert!(manager.lock().await.pending.is_empty());
}

#[tokio::test]
async fn get_tasks_returns_the_aggregate_view() {
    let (addr, manager) = spawn_manager_api().await;
    {
        let mut m = manager.lock().await;
        let task = Task {
            state: State::Running,
            image: "strm/helloworld-http".to_string(),
            container_id: Some("deadbeef".to_string()),
            ..Default::default()
        };
        m.task_db.insert(task.id, task);
    }

    let resp = reqwest::get(format!("http://{addr}/tasks")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let tasks: Vec<Task> = resp.json().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].state, State::Running);
    assert_eq!(tasks[0].container_id.as_deref(), Some("deadbeef"));
}

#[tokio::test]
async fn delete_queues_a_stop_and_applies_the_informational_transition() {
    let (addr, manager) = spawn_manager_api().await;
    let task = Task {
        state: State::Running,
        image: "strm/helloworld-http".to_string(),
        container_id: Some("deadbeef".to_string()),
        ..Default::default()
    };
    let task_id = task.id;
    manager.lock().await.task_db.insert(task_id, task);

    let resp = reqwest::Client::new()
        .delete(format!("http://{addr}/tasks/{task_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);

    let m = manager.lock().await;
    let event = m.pending.front().expect("a stop event must be queued");
    assert_eq!(event.action, Action::Stop);
    assert_eq!(event.task.id, task_id);
    // Local view flips to Completed; the worker's stop is authoritative.
    assert_eq!(m.task_db[&task_id].state, State::Completed);
}

#[tokio::test]
async fn delete_of_an_unknown_task_is_a_404() {
    let (addr, _manager) = spawn_manager_api().await;

    let resp = reqwest::Client::new()
        .delete(format!("http://{addr}/tasks/{}", Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}
