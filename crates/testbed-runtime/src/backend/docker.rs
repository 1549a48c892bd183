//! Docker engine backend built on `bollard`.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
    ListContainersOptions, LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, CommitContainerOptions, CreateImageOptions};
use bollard::models::{ContainerStateStatusEnum, HostConfig, PortBinding};
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::StreamExt;
use testbed_common::error::{Result, TestbedError};
use testbed_common::types::{ContainerId, ContainerState};

use super::{BuildRequest, ContainerConfig, ContainerInfo, ContainerRuntime, HostPort, LogStream};
use crate::endpoint::Endpoint;
use crate::exec::ExecOutput;

/// Seconds before a request to the daemon times out.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Process-wide handle to a Docker daemon.
///
/// Cheap to clone; share one behind an `Arc<dyn ContainerRuntime>`.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    endpoint: Endpoint,
}

impl DockerRuntime {
    /// Resolves the endpoint once and connects to the daemon.
    ///
    /// # Errors
    ///
    /// Returns a connectivity error if no endpoint can be resolved or the
    /// daemon does not answer a ping.
    pub async fn connect() -> Result<Self> {
        let endpoint = Endpoint::resolve()?;
        Self::connect_to(endpoint).await
    }

    /// Connects to an explicit endpoint.
    ///
    /// # Errors
    ///
    /// Returns a connectivity error if the daemon cannot be reached.
    pub async fn connect_to(endpoint: Endpoint) -> Result<Self> {
        let docker = match &endpoint {
            Endpoint::Env(_) => Docker::connect_with_defaults(),
            Endpoint::Socket(path) => Docker::connect_with_socket(
                &path.to_string_lossy(),
                REQUEST_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            ),
        }
        .map_err(|e| TestbedError::Connectivity {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

        let runtime = Self { docker, endpoint };
        runtime.ping().await?;
        tracing::info!(endpoint = %runtime.endpoint, "connected to container engine");
        Ok(runtime)
    }
}

fn is_not_found(error: &DockerError) -> bool {
    matches!(
        error,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn runtime_error(operation: &'static str, error: &DockerError) -> TestbedError {
    TestbedError::Runtime {
        operation,
        message: error.to_string(),
    }
}

fn not_found_or(operation: &'static str, container: &str, error: &DockerError) -> TestbedError {
    if is_not_found(error) {
        TestbedError::NotFound {
            kind: "container",
            id: container.to_string(),
        }
    } else {
        runtime_error(operation, error)
    }
}

fn state_from_status(running: Option<bool>, status: Option<&str>) -> ContainerState {
    if running == Some(true) || status == Some("running") {
        ContainerState::Running
    } else if status == Some("created") {
        ContainerState::Created
    } else {
        ContainerState::Exited
    }
}

/// Parses `{"1247/tcp": [{"HostPort": "32768"}]}` style port maps.
fn published_ports(ports: Option<HashMap<String, Option<Vec<PortBinding>>>>) -> HashMap<u16, u16> {
    ports
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, bindings)| {
            let container_port = key.split('/').next()?.parse().ok()?;
            let host_port = bindings?
                .into_iter()
                .find_map(|b| b.host_port.and_then(|p| p.parse().ok()))?;
            Some((container_port, host_port))
        })
        .collect()
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }

    async fn ping(&self) -> Result<()> {
        let _ = self
            .docker
            .ping()
            .await
            .map_err(|e| TestbedError::Connectivity {
                endpoint: self.endpoint.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(runtime_error("inspect image", &e)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        tracing::info!(image, "pulling image - this may take a few minutes");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| TestbedError::ImageAcquisition {
                image: image.to_string(),
                message: e.to_string(),
            })?;
            if let Some(status) = info.status {
                tracing::trace!(image, %status, "pull progress");
            }
        }
        tracing::info!(image, "pulled image");
        Ok(())
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<()> {
        tracing::info!(tag = %request.tag, "building image - this may take a few minutes");
        let options = BuildImageOptions {
            dockerfile: request.dockerfile.clone(),
            t: request.tag.clone(),
            buildargs: request.build_args.clone(),
            rm: true,
            ..Default::default()
        };
        let mut stream = self
            .docker
            .build_image(options, None, Some(request.context.clone().into()));
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| TestbedError::ImageAcquisition {
                image: request.tag.clone(),
                message: e.to_string(),
            })?;
            if let Some(error) = info.error {
                return Err(TestbedError::ImageAcquisition {
                    image: request.tag.clone(),
                    message: error,
                });
            }
            if let Some(line) = info.stream {
                tracing::debug!(tag = %request.tag, "{}", line.trim_end());
            }
        }
        Ok(())
    }

    async fn commit(&self, container: &str, repository: &str, tag: &str) -> Result<()> {
        let options = CommitContainerOptions {
            container: container.to_string(),
            repo: repository.to_string(),
            tag: tag.to_string(),
            pause: true,
            ..Default::default()
        };
        let _ = self
            .docker
            .commit_container(options, Config::<String>::default())
            .await
            .map_err(|e| not_found_or("commit", container, &e))?;
        Ok(())
    }

    async fn create(&self, config: &ContainerConfig) -> Result<ContainerId> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        if let Some(port) = config.exposed_port {
            let key = format!("{port}/tcp");
            let _ = exposed_ports.insert(key.clone(), HashMap::new());
            if let Some(host_port) = config.host_port {
                let host_port = match host_port {
                    HostPort::Any => String::new(),
                    HostPort::Fixed(p) => p.to_string(),
                };
                let _ = port_bindings.insert(
                    key,
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(host_port),
                    }]),
                );
            }
        }

        let host_config = HostConfig {
            links: (!config.links.is_empty()).then(|| config.links.clone()),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            ..Default::default()
        };
        let env: Vec<String> = config.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let body = Config {
            image: Some(config.image.clone()),
            cmd: (!config.command.is_empty()).then(|| config.command.clone()),
            env: (!env.is_empty()).then_some(env),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: config.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(|e| runtime_error("create", &e))?;
        for warning in &response.warnings {
            tracing::warn!(container = %config.name, %warning, "engine warning on create");
        }
        Ok(ContainerId::new(response.id))
    }

    async fn start(&self, container: &str) -> Result<()> {
        self.docker
            .start_container(container, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| not_found_or("start", container, &e))
    }

    async fn kill(&self, container: &str) -> Result<()> {
        self.docker
            .kill_container(container, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| not_found_or("kill", container, &e))
    }

    async fn remove(&self, container: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(container, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(runtime_error("remove", &e)),
        }
    }

    async fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput> {
        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(command.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| not_found_or("exec", container, &e))?;

        let mut output = ExecOutput::default();
        if let StartExecResults::Attached { output: mut stream, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| runtime_error("exec", &e))?
        {
            while let Some(chunk) = stream.next().await {
                match chunk.map_err(|e| runtime_error("exec", &e))? {
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        output.stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdErr { message } => {
                        output.stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdIn { .. } => {}
                }
            }
        }

        let inspected = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| runtime_error("exec", &e))?;
        output.exit_code = inspected
            .exit_code
            .and_then(|code| i32::try_from(code).ok())
            .unwrap_or(-1);
        Ok(output)
    }

    fn logs(&self, container: &str) -> LogStream {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let container = container.to_string();
        self.docker
            .logs(&container, Some(options))
            .map(move |item| {
                item.map(|output| output.to_string())
                    .map_err(|e| not_found_or("logs", &container, &e))
            })
            .boxed()
    }

    async fn inspect(&self, container: &str) -> Result<Option<ContainerInfo>> {
        let response = match self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => response,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(runtime_error("inspect", &e)),
        };

        let (running, status) = response
            .state
            .map(|s| (s.running, s.status))
            .unwrap_or_default();
        let status = status.map(|s| match s {
            ContainerStateStatusEnum::RUNNING => "running",
            ContainerStateStatusEnum::CREATED => "created",
            _ => "exited",
        });

        Ok(Some(ContainerInfo {
            id: ContainerId::new(response.id.unwrap_or_default()),
            name: response
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            state: state_from_status(running, status),
            image: response.config.and_then(|c| c.image).unwrap_or_default(),
            ports: published_ports(response.network_settings.and_then(|n| n.ports)),
        }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ContainerInfo>> {
        let filters = HashMap::from([("name".to_string(), vec![prefix.to_string()])]);
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| runtime_error("list", &e))?;

        Ok(summaries
            .into_iter()
            .filter_map(|summary| {
                let name = summary
                    .names?
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .find(|n| n.starts_with(prefix))?;
                Some(ContainerInfo {
                    id: ContainerId::new(summary.id.unwrap_or_default()),
                    name,
                    state: state_from_status(None, summary.state.as_deref()),
                    image: summary.image.unwrap_or_default(),
                    ports: summary
                        .ports
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|p| Some((p.private_port, p.public_port?)))
                        .collect(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_mapping() {
        assert_eq!(state_from_status(Some(true), None), ContainerState::Running);
        assert_eq!(state_from_status(None, Some("created")), ContainerState::Created);
        assert_eq!(state_from_status(Some(false), Some("exited")), ContainerState::Exited);
    }

    #[test]
    fn port_map_parsing() {
        let ports = HashMap::from([
            (
                "1247/tcp".to_string(),
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".into()),
                    host_port: Some("32768".into()),
                }]),
            ),
            ("5432/tcp".to_string(), None),
        ]);
        let parsed = published_ports(Some(ports));
        assert_eq!(parsed.get(&1247), Some(&32768));
        assert!(!parsed.contains_key(&5432));
    }

    #[tokio::test]
    #[ignore = "requires a running Docker daemon"]
    async fn connects_to_local_daemon() {
        let runtime = DockerRuntime::connect().await.expect("connect");
        runtime.ping().await.expect("ping");
    }
}
