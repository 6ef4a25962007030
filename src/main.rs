use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use tokio::sync::Mutex;

use cube::manager::{self, Manager, ManagerServer};
use cube::worker::{self, TaskServer, Worker};

#[derive(Parser)]
#[command(name = "cube", version, about = "A small two-tier container orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a worker node: lifecycle, reconciler and stats loops plus the
    /// worker API.
    Worker {
        #[arg(long, env = "CUBE_WORKER_HOST", default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "CUBE_WORKER_PORT", default_value_t = 5555)]
        port: u16,
        #[arg(long, default_value = "worker-1")]
        name: String,
    },
    /// Run the manager: scheduling, reconciliation and health-check loops
    /// plus the manager API.
    Manager {
        #[arg(long, env = "CUBE_MANAGER_HOST", default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "CUBE_MANAGER_PORT", default_value_t = 5556)]
        port: u16,
        /// Worker addresses (host:port, comma separated). Defaults to the
        /// CUBE_WORKER_HOST/CUBE_WORKER_PORT pair.
        #[arg(long, value_delimiter = ',')]
        workers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Worker { host, port, name } => run_worker(host, port, name).await,
        Command::Manager {
            host,
            port,
            workers,
        } => run_manager(host, port, workers).await,
    }
}

async fn run_worker(host: String, port: u16, name: String) -> Result<()> {
    info!("starting cube worker {name}");
    let worker = Arc::new(Mutex::new(Worker::new(&name)));

    tokio::spawn(worker::run_tasks(worker.clone()));
    tokio::spawn(worker::update_tasks(worker.clone()));
    tokio::spawn(worker::collect_stats(worker.clone()));

    TaskServer::new(worker, &host, port).start_server().await?;
    Ok(())
}

async fn run_manager(host: String, port: u16, workers: Vec<String>) -> Result<()> {
    let workers = if workers.is_empty() {
        let worker_host =
            std::env::var("CUBE_WORKER_HOST").unwrap_or_else(|_| "localhost".to_string());
        let worker_port = std::env::var("CUBE_WORKER_PORT").unwrap_or_else(|_| "5555".to_string());
        vec![format!("{worker_host}:{worker_port}")]
    } else {
        workers
    };

    info!("starting cube manager with workers {workers:?}");
    let manager = Arc::new(Mutex::new(Manager::new(workers)));

    tokio::spawn(manager::process_tasks(manager.clone()));
    tokio::spawn(manager::update_tasks(manager.clone()));
    tokio::spawn(manager::do_health_checks(manager.clone()));

    ManagerServer::new(manager, &host, port)
        .start_server()
        .await?;
    Ok(())
}
