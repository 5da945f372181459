//! Container runtime used to launch devnet nodes.

use std::{collections::BTreeMap, collections::HashSet, mem, net::IpAddr, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StopContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    network::CreateNetworkOptions,
    secret::HostConfig,
};
use derive_more::Deref;
use futures::{StreamExt, executor::block_on, future::join_all};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::DockerConfig;

/// Timeout for shutting down docker and cleaning up containers.
const DOCKER_DROP_TIMEOUT: Duration = Duration::from_secs(60);

/// A Docker image reference with image name and tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DockerImage {
    /// The image name (e.g., "ghcr.io/taikoxyz/taiko-geth").
    pub image: String,
    /// The image tag (e.g., "latest" or "v1.0.0").
    pub tag: String,
}

impl DockerImage {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
        }
    }

    /// Get the full image reference (image:tag).
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

impl std::fmt::Display for DockerImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.image, self.tag)
    }
}

/// Everything the runtime needs to start one node container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name, unique within the devnet.
    pub name: String,
    pub image: DockerImage,
    /// Flat launch environment.
    pub env: BTreeMap<String, String>,
}

impl ContainerSpec {
    pub fn env_list(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// A started container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    pub container_id: String,
    pub container_name: String,
    /// Address of the container on the devnet network.
    pub ip: IpAddr,
}

/// Result of running a command inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The container operations the devnet relies on.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Start a container and return once it has an address on the devnet network.
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    /// Run a command inside a running container and wait for it to complete.
    async fn exec(&self, container_id: &str, cmd: &[&str]) -> Result<ExecOutput>;

    /// Stop and remove a container.
    async fn stop(&self, container_id: &str) -> Result<()>;
}

/// [`ContainerRuntime`] backed by the local Docker daemon.
///
/// Every container is attached to one bridge network created for the run. Containers and the
/// network are removed on drop unless `no_cleanup` is set.
#[derive(Deref)]
pub struct DockerRuntime {
    #[deref]
    docker: Docker,

    /// Containers that have been started.
    containers: Mutex<HashSet<String>>,

    /// Network ID for container communication.
    network_id: String,

    config: DockerConfig,
}

impl Drop for DockerRuntime {
    fn drop(&mut self) {
        if self.config.no_cleanup {
            tracing::debug!("Cleanup of docker containers on exit is disabled. Exiting.");
            return;
        }

        let containers = mem::take(self.containers.get_mut());
        tracing::debug!("Cleaning up {} container(s)...", containers.len());

        let docker = self.docker.clone();
        let network_id = self.network_id.clone();

        let cleanup = async move {
            let results = containers
                .into_iter()
                .map(async |container_id| {
                    Self::stop_and_remove_container_static(&docker, &container_id).await
                })
                .collect::<Vec<_>>();

            timeout(DOCKER_DROP_TIMEOUT, join_all(results))
                .await?
                .into_iter()
                .collect::<Result<Vec<_>>>()?;

            tracing::trace!(network_id, "Removing network");
            docker
                .remove_network(&network_id)
                .await
                .context("Failed to remove network")?;

            Ok::<_, anyhow::Error>(())
        };

        if let Err(e) = block_on(cleanup) {
            tracing::error!(error = ?e, "Failed to cleanup containers and networks");
            return;
        }

        tracing::info!("Cleanup completed successfully");
    }
}

impl DockerRuntime {
    const STOP_CONTAINER_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connect to the local Docker daemon and create the devnet network.
    pub async fn new(config: DockerConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker. Is Docker running?")?;

        let network_id = Self::create_network(&docker, &config.net_name).await?;

        Ok(Self {
            docker,
            config,
            network_id,
            containers: Mutex::new(HashSet::new()),
        })
    }

    /// Create a Docker network for container communication.
    async fn create_network(docker: &Docker, network_name: &str) -> Result<String> {
        tracing::info!("Creating Docker network: {}", network_name);

        let response = docker
            .create_network(CreateNetworkOptions {
                name: network_name.to_string(),
                check_duplicate: true,
                driver: "bridge".to_string(),
                ..Default::default()
            })
            .await
            .context("Failed to create Docker network")?;

        let network_id = (!response.id.is_empty())
            .then(|| response.id)
            .unwrap_or(network_name.to_string());

        tracing::trace!(network_id, "Docker network created");

        Ok(network_id)
    }

    /// Pull the image unless it is already available locally.
    pub async fn pull_image(&self, image: &DockerImage) -> Result<()> {
        let full_image = image.full_name();

        if self.docker.inspect_image(&full_image).await.is_ok() {
            tracing::debug!(image = %full_image, "Image already available locally, skipping pull");
            return Ok(());
        }

        tracing::debug!(image = %full_image, "Image not found locally, pulling...");

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.image.clone(),
                tag: image.tag.clone(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(result) = stream.next().await
            && let Some(status) = result
                .map_err(|e| anyhow::anyhow!("Failed to pull image '{}': {}", full_image, e))?
                .status
        {
            tracing::trace!(status, "Image pull");
        }

        Ok(())
    }

    /// Forward container output to the log.
    fn stream_logs(&self, container_id: &str) {
        let mut log_stream = self.logs(
            container_id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            }),
        );
        let container_id = container_id.to_string();

        tokio::spawn(async move {
            while let Some(log_result) = log_stream.next().await {
                match log_result {
                    Ok(log) => tracing::debug!(%container_id, %log),
                    Err(e) => {
                        tracing::debug!(%container_id, error = %e, "Log stream closed");
                        break;
                    }
                }
            }
        });
    }

    /// Resolve the container's address on the devnet network.
    async fn container_ip(&self, container_id: &str) -> Result<IpAddr> {
        let info = self
            .inspect_container(container_id, None)
            .await
            .context("Failed to inspect container")?;

        let networks = info
            .network_settings
            .and_then(|settings| settings.networks)
            .context("Container has no network settings")?;

        let ip = networks
            .get(&self.config.net_name)
            .or_else(|| networks.values().next())
            .and_then(|endpoint| endpoint.ip_address.clone())
            .filter(|ip| !ip.is_empty())
            .context("Container has no IP address on the devnet network")?;

        ip.parse()
            .with_context(|| format!("Invalid container IP address: {ip}"))
    }

    async fn stop_and_remove_container_static(docker: &Docker, container_id: &str) -> Result<()> {
        tracing::trace!(container_id, "Stopping and removing container");

        docker
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: Self::STOP_CONTAINER_TIMEOUT.as_secs() as i64,
                }),
            )
            .await
            .ok(); // Ignore errors if already stopped

        docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .ok(); // Ignore errors if already removed

        tracing::trace!(container_id, "Container stopped and removed");
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        self.pull_image(&spec.image).await?;

        let container_config = Config {
            image: Some(spec.image.full_name()),
            env: Some(spec.env_list()),
            host_config: Some(HostConfig {
                network_mode: Some(self.network_id.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        tracing::trace!(container_name = %spec.name, "Creating container");
        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.as_str(),
                    ..Default::default()
                }),
                container_config,
            )
            .await
            .with_context(|| format!("Failed to create container {}", spec.name))?;

        let container_id = container.id;
        self.containers.lock().insert(container_id.clone());

        self.docker
            .start_container::<String>(&container_id, None)
            .await
            .with_context(|| format!("Failed to start container {}", spec.name))?;

        if self.config.stream_logs {
            self.stream_logs(&container_id);
        }

        let ip = self.container_ip(&container_id).await?;
        tracing::debug!(container_name = %spec.name, %ip, "Container started");

        Ok(ContainerHandle {
            container_id,
            container_name: spec.name.clone(),
            ip,
        })
    }

    async fn exec(&self, container_id: &str, cmd: &[&str]) -> Result<ExecOutput> {
        let exec = self
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(cmd.iter().map(|c| c.to_string()).collect::<Vec<_>>()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("Failed to create exec {cmd:?} in {container_id}"))?;

        let mut output = ExecOutput::default();

        if let StartExecResults::Attached { output: mut stream, .. } = self
            .start_exec(&exec.id, None)
            .await
            .context("Failed to start exec")?
        {
            while let Some(chunk) = stream.next().await {
                match chunk.context("Failed to read exec output")? {
                    bollard::container::LogOutput::StdErr { message } => {
                        output.stderr.push_str(&String::from_utf8_lossy(&message))
                    }
                    other => output.stdout.push_str(&other.to_string()),
                }
            }
        }

        let inspect = self
            .inspect_exec(&exec.id)
            .await
            .context("Failed to inspect exec")?;
        output.exit_code = exec_exit_code(&exec.id, inspect.exit_code)?;

        tracing::debug!(container_id, ?cmd, exit_code = output.exit_code, "Exec completed");

        Ok(output)
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        self.containers.lock().remove(container_id);
        Self::stop_and_remove_container_static(&self.docker, container_id).await
    }
}

/// An exec whose exit code cannot be read has not finished successfully.
fn exec_exit_code(exec_id: &str, exit_code: Option<i64>) -> Result<i64> {
    exit_code.with_context(|| format!("Exec {exec_id} reported no exit code"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_exec_exit_code_is_an_error() {
        assert_eq!(exec_exit_code("exec-1", Some(0)).unwrap(), 0);
        assert_eq!(exec_exit_code("exec-1", Some(2)).unwrap(), 2);

        let err = exec_exit_code("exec-1", None).unwrap_err();
        assert!(err.to_string().contains("exec-1 reported no exit code"));
    }

    #[test]
    fn test_env_list_is_sorted_key_value_pairs() {
        let spec = ContainerSpec {
            name: "taiko-geth-0".to_string(),
            image: DockerImage::new("taiko-geth", "latest"),
            env: BTreeMap::from([
                ("HIVE_NETWORK_ID".to_string(), "167003".to_string()),
                ("HIVE_BOOTNODE".to_string(), "enode://a@1.2.3.4:30303".to_string()),
            ]),
        };

        assert_eq!(
            spec.env_list(),
            vec![
                "HIVE_BOOTNODE=enode://a@1.2.3.4:30303".to_string(),
                "HIVE_NETWORK_ID=167003".to_string(),
            ]
        );
    }

    #[test]
    fn test_image_full_name() {
        let image = DockerImage::new("ghcr.io/taikoxyz/taiko-geth", "v1.2.0");
        assert_eq!(image.full_name(), "ghcr.io/taikoxyz/taiko-geth:v1.2.0");
        assert_eq!(image.to_string(), image.full_name());
    }

    #[test]
    fn test_exec_output_success() {
        assert!(ExecOutput::default().success());
        assert!(
            !ExecOutput {
                exit_code: 1,
                ..Default::default()
            }
            .success()
        );
    }
}
