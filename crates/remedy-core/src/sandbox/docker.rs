// src/sandbox/docker.rs
use async_trait::async_trait;
#[allow(deprecated)]
use bollard::image::CreateImageOptions;
use bollard::container::LogOutput;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    LogsOptions as BollardLogsOptionsQuery,
    RemoveContainerOptions as BollardRemoveContainerOptionsQuery,
    StartContainerOptions as BollardStartContainerOptionsQuery,
    WaitContainerOptions as BollardWaitContainerOptionsQuery,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use nix::unistd::{getgid, getuid};
use std::default::Default;
use uuid::Uuid;

use super::workspace::{has_manifest, materialize, release};
use super::{RawOutput, SandboxBackend, SandboxJob, SandboxLimits};
use crate::errors::SandboxError;

const CONTAINER_WORK_DIR: &str = "/workspace";
const PIDS_LIMIT: i64 = 256;
// writable home for pip and npm caches when running as a non-root user
const CONTAINER_HOME: &str = "HOME=/tmp";

/// Runs each job in single-use containers: an optional install container
/// with network access, then the run container under the full limits.
/// Both run as the host user so everything written into the bind-mounted
/// workspace can be removed afterwards.
pub struct DockerSandbox {
    docker: Docker,
    image_override: Option<String>,
    user: String,
}

impl DockerSandbox {
    pub fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            image_override: None,
            user: format!("{}:{}", getuid(), getgid()),
        })
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image_override = Some(image.into());
        self
    }

    fn image_for(&self, job: &SandboxJob<'_>) -> String {
        self.image_override
            .clone()
            .unwrap_or_else(|| job.language.docker_image().to_string())
    }

    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        log::info!("Pulling sandbox image {}", image);
        #[allow(deprecated)]
        let mut pull = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = pull.next().await {
            match progress {
                Ok(info) => log::debug!("Pulling image: {:?}", info.status),
                Err(e) => return Err(SandboxError::BollardError(e)),
            }
        }
        Ok(())
    }

    fn container_config(
        &self,
        image: &str,
        cmd: Vec<String>,
        env: Vec<String>,
        host_dir: &str,
        limits: &SandboxLimits,
        network: bool,
    ) -> ContainerCreateBody {
        let memory_bytes = (limits.memory_limit_mb as i64) * 1024 * 1024;
        ContainerCreateBody {
            image: Some(image.to_string()),
            cmd: Some(cmd),
            env: Some(env),
            user: Some(self.user.clone()),
            working_dir: Some(CONTAINER_WORK_DIR.to_string()),
            network_disabled: Some(!network),
            host_config: Some(HostConfig {
                binds: Some(vec![format!("{}:{}", host_dir, CONTAINER_WORK_DIR)]),
                memory: Some(memory_bytes),
                memory_swap: Some(memory_bytes),
                nano_cpus: Some((limits.cpu_limit * 1_000_000_000.0) as i64),
                pids_limit: Some(PIDS_LIMIT),
                network_mode: if network { None } else { Some("none".to_string()) },
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                ..Default::default()
            }),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        }
    }

    /// Create, start and wait for one container, then collect its logs.
    async fn run_container(
        &self,
        name: &str,
        config: ContainerCreateBody,
    ) -> Result<RawOutput, SandboxError> {
        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(name.to_string()),
            ..Default::default()
        });
        let container = self.docker.create_container(options, config).await?;
        self.docker
            .start_container(&container.id, None::<BollardStartContainerOptionsQuery>)
            .await?;

        let mut wait_stream = self
            .docker
            .wait_container(&container.id, None::<BollardWaitContainerOptionsQuery>);

        // bollard reports a non-zero exit as an error carrying the code
        let exit_code = match wait_stream.next().await {
            Some(Ok(response)) => response.status_code,
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => return Err(SandboxError::BollardError(e)),
            None => {
                return Err(SandboxError::WorkspaceError(
                    "container wait stream ended unexpectedly".to_string(),
                ))
            }
        };

        let mut output_stream = self.docker.logs(
            &container.id,
            Some(BollardLogsOptionsQuery {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut stdout = String::new();
        let mut stderr = String::new();
        while let Some(log_result) = output_stream.next().await {
            match log_result? {
                LogOutput::StdOut { message } => stdout.push_str(&String::from_utf8_lossy(&message)),
                LogOutput::StdErr { message } => stderr.push_str(&String::from_utf8_lossy(&message)),
                _ => {}
            }
        }

        Ok(RawOutput {
            exit_code: exit_code as i32,
            stdout,
            stderr,
        })
    }

    /// Force-remove the named containers, killing them if still running.
    async fn teardown(&self, names: &[&str]) {
        for name in names {
            let options = Some(BollardRemoveContainerOptionsQuery {
                force: true,
                ..Default::default()
            });
            match self.docker.remove_container(name, options).await {
                Ok(()) => log::debug!("Removed sandbox container {}", name),
                Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {}
                Err(e) => log::warn!("Failed to remove sandbox container {}: {}", name, e),
            }
        }
    }
}

#[async_trait]
impl SandboxBackend for DockerSandbox {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn probe(&self) -> Result<(), SandboxError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| SandboxError::Unavailable(e.to_string()))
    }

    async fn run(&self, job: &SandboxJob<'_>, limits: &SandboxLimits) -> Result<RawOutput, SandboxError> {
        let deadline = tokio::time::Instant::now() + limits.timeout;
        let workspace = materialize(job)?;
        let host_dir = workspace
            .path()
            .to_str()
            .ok_or_else(|| SandboxError::WorkspaceError("Invalid temp path".to_string()))?
            .to_string();

        let image = self.image_for(job);
        // Image pulls are provisioning, not execution; they are not charged to the timeout
        self.ensure_image(&image).await?;

        let invocation = Uuid::new_v4();
        let install_name = format!("remedy-{}-install", invocation);
        let run_name = format!("remedy-{}-run", invocation);

        let mut env: Vec<String> = vec![CONTAINER_HOME.to_string()];
        env.extend(
            job.language
                .runtime_env(CONTAINER_WORK_DIR)
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v)),
        );
        env.extend(job.env.iter().map(|(k, v)| format!("{}={}", k, v)));

        let install = job
            .language
            .install_command()
            .filter(|_| has_manifest(job))
            .map(|cmd| {
                let env = vec![CONTAINER_HOME.to_string()];
                self.container_config(&image, cmd, env, &host_dir, limits, true)
            });
        let run = self.container_config(
            &image,
            job.language.run_command(job.entry_point),
            env,
            &host_dir,
            limits,
            !limits.network_disabled,
        );

        let outcome = tokio::time::timeout_at(deadline, async {
            if let Some(install) = install {
                log::debug!("Installing dependencies in {}", install_name);
                let output = self.run_container(&install_name, install).await?;
                if output.exit_code != 0 {
                    log::warn!("Dependency installation failed with exit code {}", output.exit_code);
                    return Ok(output);
                }
            }
            self.run_container(&run_name, run).await
        })
        .await;

        self.teardown(&[&install_name, &run_name]).await;
        release(workspace);

        match outcome {
            Ok(result) => result,
            Err(_) => Err(SandboxError::Timeout),
        }
    }
}
