//! The only module that talks to the container engine.

use std::collections::HashMap;

use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::secret::{
    ContainerInspectResponse, HostConfig, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::Docker;
use futures_util::StreamExt;
use log::{debug, error, info};
use thiserror::Error;

use super::types::Config;

#[derive(Debug, Error)]
pub enum DockerError {
    #[error("docker client error: {0}")]
    Client(#[source] bollard::errors::Error),
    #[error("error pulling image {image}: {source}")]
    ImagePull {
        image: String,
        #[source]
        source: bollard::errors::Error,
    },
    #[error("error creating container from image {image}: {source}")]
    ContainerCreate {
        image: String,
        #[source]
        source: bollard::errors::Error,
    },
    #[error("error starting container {id}: {source}")]
    ContainerStart {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },
    #[error("error stopping container {id}: {source}")]
    ContainerStop {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },
    #[error("error removing container {id}: {source}")]
    ContainerRemove {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },
    #[error("error restarting container {id}: {source}")]
    ContainerRestart {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },
    #[error("error inspecting container {id}: {source}")]
    Inspect {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },
}

/// Successful outcome of a driver operation.
#[derive(Debug, Clone)]
pub struct DockerOutcome {
    pub container_id: String,
    pub action: &'static str,
    pub result: &'static str,
}

pub type DockerResult = Result<DockerOutcome, DockerError>;

#[derive(Debug, Clone)]
pub struct DockerClient {
    pub client: Docker,
    pub config: Config,
}

impl DockerClient {
    pub fn new(config: Config) -> Result<Self, DockerError> {
        let client = Docker::connect_with_unix_defaults().map_err(DockerError::Client)?;
        Ok(DockerClient { client, config })
    }

    /// Pull the image, create the container with resource caps and restart
    /// policy, publish all exposed ports, start it and attach its log
    /// streams to our stdout/stderr.
    pub async fn run(&self) -> DockerResult {
        info!("pulling image {}", self.config.image);
        let mut pull = self.client.create_image(
            Some(CreateImageOptions {
                from_image: self.config.image.clone(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(msg) = pull.next().await {
            match msg {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!("pull {}: {}", self.config.image, status);
                    }
                }
                Err(source) => {
                    return Err(DockerError::ImagePull {
                        image: self.config.image.clone(),
                        source,
                    });
                }
            }
        }

        let restart_policy = RestartPolicy {
            name: Some(restart_policy_name(&self.config.restart_policy)),
            maximum_retry_count: None,
        };

        let host_config = HostConfig {
            restart_policy: Some(restart_policy),
            nano_cpus: Some((self.config.cpu * 1_000_000_000.0) as i64),
            memory: Some(self.config.memory),
            publish_all_ports: Some(true),
            ..Default::default()
        };

        let exposed_ports: HashMap<String, HashMap<(), ()>> = self
            .config
            .exposed_ports
            .iter()
            .map(|port| (format!("{port}/tcp"), HashMap::new()))
            .collect();

        let container_config = ContainerConfig {
            image: Some(self.config.image.clone()),
            env: Some(self.config.env.clone()),
            cmd: if self.config.cmd.is_empty() {
                None
            } else {
                Some(self.config.cmd.clone())
            },
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: self.config.name.clone(),
            ..Default::default()
        });

        let container_id = self
            .client
            .create_container(options, container_config)
            .await
            .map_err(|source| DockerError::ContainerCreate {
                image: self.config.image.clone(),
                source,
            })?
            .id;

        self.client
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|source| DockerError::ContainerStart {
                id: container_id.clone(),
                source,
            })?;

        info!("container {} started", container_id);
        self.attach_logs(&container_id);

        Ok(DockerOutcome {
            container_id,
            action: "start",
            result: "success",
        })
    }

    // Best-effort: a failed log stream never fails the task.
    fn attach_logs(&self, container_id: &str) {
        let client = self.client.clone();
        let id = container_id.to_string();
        tokio::spawn(async move {
            let mut logs = client.logs(
                &id,
                Some(LogsOptions::<String> {
                    stdout: true,
                    stderr: true,
                    ..Default::default()
                }),
            );
            while let Some(chunk) = logs.next().await {
                match chunk {
                    Ok(LogOutput::StdErr { message }) => {
                        eprint!("{}", String::from_utf8_lossy(&message));
                    }
                    Ok(output) => {
                        print!("{}", String::from_utf8_lossy(&output.into_bytes()));
                    }
                    Err(e) => {
                        debug!("log stream for container {id} ended: {e}");
                        break;
                    }
                }
            }
        });
    }

    /// Stop with the engine's default grace period, then remove the
    /// container along with its volumes.
    pub async fn stop(&self, container_id: &str) -> DockerResult {
        info!("attempting to stop container {container_id}");
        self.client
            .stop_container(container_id, None::<StopContainerOptions>)
            .await
            .map_err(|source| DockerError::ContainerStop {
                id: container_id.to_string(),
                source,
            })?;

        self.client
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    v: true,
                    force: false,
                    link: false,
                }),
            )
            .await
            .map_err(|source| DockerError::ContainerRemove {
                id: container_id.to_string(),
                source,
            })?;

        Ok(DockerOutcome {
            container_id: container_id.to_string(),
            action: "stop",
            result: "success",
        })
    }

    pub async fn restart(&self, container_id: &str) -> DockerResult {
        info!("attempting to restart container {container_id}");
        self.client
            .restart_container(container_id, None::<RestartContainerOptions>)
            .await
            .map_err(|source| DockerError::ContainerRestart {
                id: container_id.to_string(),
                source,
            })?;

        Ok(DockerOutcome {
            container_id: container_id.to_string(),
            action: "restart",
            result: "success",
        })
    }

    pub async fn inspect(
        &self,
        container_id: &str,
    ) -> Result<ContainerInspectResponse, DockerError> {
        self.client
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|source| {
                error!("error inspecting container {container_id}: {source}");
                DockerError::Inspect {
                    id: container_id.to_string(),
                    source,
                }
            })
    }
}

fn restart_policy_name(policy: &str) -> RestartPolicyNameEnum {
    match policy {
        "always" => RestartPolicyNameEnum::ALWAYS,
        "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
        "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
        _ => RestartPolicyNameEnum::NO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_policy_names_map_to_engine_values() {
        assert_eq!(restart_policy_name("always"), RestartPolicyNameEnum::ALWAYS);
        assert_eq!(
            restart_policy_name("on-failure"),
            RestartPolicyNameEnum::ON_FAILURE
        );
        assert_eq!(
            restart_policy_name("unless-stopped"),
            RestartPolicyNameEnum::UNLESS_STOPPED
        );
        assert_eq!(restart_policy_name("no"), RestartPolicyNameEnum::NO);
        assert_eq!(restart_policy_name(""), RestartPolicyNameEnum::NO);
    }
}
