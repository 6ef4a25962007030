//! Worker control surface tests. These bind the real router on an
//! ephemeral port and drive it over HTTP; no container engine is needed.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use uuid::Uuid;

use cube::tasks::types::{Action, State, Task};
use cube::worker::{TaskServer, Worker};

async fn spawn_worker_api() -> (SocketAddr, Arc<Mutex<Worker>>) {
    let worker = Arc::new(Mutex::new(Worker::new("test-worker")));
    let app = TaskServer::router(worker.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, worker)
}

fn running_task() -> Task {
    Task {
        name: "running-task".to_string(),
        state: State::Running,
        image: "strm/helloworld-http".to_string(),
        container_id: Some("deadbeef".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn post_task_enqueues_and_echoes_the_task() {
    let (addr, worker) = spawn_worker_api().await;
    let task_id = Uuid::new_v4();

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/tasks"))
        .json(&json!({
            "Action": "Start",
            "Task": { "ID": task_id, "Name": "web", "Image": "strm/helloworld-http" }
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    let echoed: Task = resp.json().await.unwrap();
    assert_eq!(echoed.id, task_id);

    let w = worker.lock().await;
    assert_eq!(w.queue.len(), 1);
    assert_eq!(w.queue.front().unwrap().action, Action::Start);
}

#[tokio::test]
async fn post_with_unknown_fields_is_a_400_with_envelope() {
    let (addr, worker) = spawn_worker_api().await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/tasks"))
        .json(&json!({
            "Action": "Start",
            "Bogus": 1,
            "Task": { "ID": Uuid::new_v4(), "Image": "alpine:latest" }
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let envelope: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(envelope["HTTPStatusCode"], 400);
    assert!(envelope["Message"].as_str().unwrap().contains("body"));

    assert!(worker.lock().await.queue.is_empty());
}

#[tokio::test]
async fn get_tasks_returns_the_local_table() {
    let (addr, worker) = spawn_worker_api().await;
    {
        let mut w = worker.lock().await;
        let task = running_task();
        w.db.insert(task.id, task);
    }

    let resp = reqwest::get(format!("http://{addr}/tasks")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let tasks: Vec<Task> = resp.json().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].state, State::Running);
}

#[tokio::test]
async fn delete_synthesizes_a_stop_event() {
    let (addr, worker) = spawn_worker_api().await;
    let task = running_task();
    let task_id = task.id;
    worker.lock().await.db.insert(task_id, task);

    let resp = reqwest::Client::new()
        .delete(format!("http://{addr}/tasks/{task_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);

    let w = worker.lock().await;
    let event = w.queue.front().expect("a stop event must be queued");
    assert_eq!(event.action, Action::Stop);
    assert_eq!(event.task.id, task_id);
}

#[tokio::test]
async fn delete_of_an_unknown_task_is_a_404() {
    let (addr, _worker) = spawn_worker_api().await;

    let resp = reqwest::Client::new()
        .delete(format!("http://{addr}/tasks/{}", Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_with_a_malformed_id_is_a_400() {
    let (addr, _worker) = spawn_worker_api().await;

    let resp = reqwest::Client::new()
        .delete(format!("http://{addr}/tasks/not-a-uuid"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stats_endpoint_reports_a_sample() {
    let (addr, worker) = spawn_worker_api().await;
    {
        let mut w = worker.lock().await;
        let task = running_task();
        w.db.insert(task.id, task);
    }

    let resp = reqwest::get(format!("http://{addr}/stats")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let stats: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(stats["task_count"], 1);
    assert!(stats.get("cpu_usage").is_some());
}
