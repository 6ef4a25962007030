use std::collections::HashMap;

use bollard::secret::PortMap;
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Lifecycle states of a task. Serialized as the integer ordinal
/// (Pending=0 .. Failed=4), matching the persisted encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    #[default]
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl Serialize for State {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for State {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match u8::deserialize(deserializer)? {
            0 => Ok(State::Pending),
            1 => Ok(State::Scheduled),
            2 => Ok(State::Running),
            3 => Ok(State::Completed),
            4 => Ok(State::Failed),
            other => Err(de::Error::invalid_value(
                de::Unexpected::Unsigned(other as u64),
                &"a state ordinal between 0 and 4",
            )),
        }
    }
}

/// Requested transitions carried by a [`TaskEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Schedule,
    Start,
    Stop,
    Fail,
    Restart,
}

impl Action {
    /// The state a task lands in once this action succeeds.
    pub fn target(self) -> State {
        match self {
            Action::Schedule => State::Scheduled,
            Action::Start => State::Running,
            Action::Stop => State::Completed,
            Action::Fail => State::Failed,
            Action::Restart => State::Running,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Task {
    #[serde(rename = "ID")]
    pub id: Uuid,
    #[serde(rename = "ContainerId", default)]
    pub container_id: Option<String>,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "State", default)]
    pub state: State,
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "Cpu", default)]
    pub cpu: f64,
    #[serde(rename = "Memory", default)]
    pub memory: i64,
    #[serde(rename = "Disk", default)]
    pub disk: i64,
    #[serde(rename = "ExposedPorts", default)]
    pub exposed_ports: Vec<u16>,
    #[serde(rename = "HostPorts", default)]
    pub host_ports: PortMap,
    #[serde(rename = "PortBindings", default)]
    pub port_bindings: HashMap<String, String>,
    #[serde(rename = "RestartPolicy", default)]
    pub restart_policy: String,
    #[serde(rename = "StartTime", default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(rename = "FinishTime", default)]
    pub finish_time: Option<DateTime<Utc>>,
    #[serde(rename = "HealthCheck", default)]
    pub health_check: Option<String>,
    #[serde(rename = "RestartCount", default)]
    pub restart_count: u32,
}

impl Default for Task {
    fn default() -> Self {
        Task {
            id: Uuid::new_v4(),
            container_id: None,
            name: String::new(),
            state: State::Pending,
            image: String::new(),
            cpu: 0.0,
            memory: 0,
            disk: 0,
            exposed_ports: Vec::new(),
            host_ports: PortMap::new(),
            port_bindings: HashMap::new(),
            restart_policy: String::new(),
            start_time: None,
            finish_time: None,
            health_check: None,
            restart_count: 0,
        }
    }
}

/// The command envelope used to request a transition on a task.
/// Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskEvent {
    #[serde(rename = "ID", default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(rename = "Action")]
    pub action: Action,
    #[serde(rename = "Timestamp", default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "Task")]
    pub task: Task,
}

/// Container configuration handed to the Docker driver.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub name: String,
    pub exposed_ports: Vec<u16>,
    pub cmd: Vec<String>,
    pub image: String,
    pub cpu: f64,
    pub memory: i64,
    pub disk: i64,
    pub env: Vec<String>,
    pub restart_policy: String,
}

pub fn new_config(task: &Task) -> Config {
    Config {
        name: task.name.clone(),
        exposed_ports: task.exposed_ports.clone(),
        image: task.image.clone(),
        cpu: task.cpu,
        memory: task.memory,
        disk: task.disk,
        restart_policy: task.restart_policy.clone(),
        ..Default::default()
    }
}
