//! Docker-backed [`SandboxRuntime`] using the bollard crate.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::debug;

use super::runtime::{ExecOutput, ExecSpec, SandboxRuntime, SandboxSpec};
use crate::error::SandboxError;

/// Directory inside the sandbox holding per-exec pid files.
const PID_DIR: &str = "/tmp/.termbench";

/// Records the shell pid, then replaces itself with the requested command.
/// `$1` is the pid file, `$2` the command.
const EXEC_WRAPPER: &str =
    r#"mkdir -p "$(dirname "$1")" 2>/dev/null; echo $$ > "$1"; exec /bin/sh -c "$2""#;

/// Stops and kills the process tree rooted at the pid stored in `$1`.
const KILL_TREE: &str = r#"kill_tree() {
  kill -STOP "$1" 2>/dev/null
  for c in $(cat /proc/"$1"/task/*/children 2>/dev/null); do kill_tree "$c"; done
  kill -KILL "$1" 2>/dev/null
}
pid=$(cat "$1" 2>/dev/null) && [ -n "$pid" ] && kill_tree "$pid"
rm -f "$1""#;

fn pid_file(exec_id: &str) -> String {
    format!("{PID_DIR}/{exec_id}.pid")
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Docker runtime talking to the local daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::RuntimeUnavailable` if the daemon is not accessible.
    pub fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::RuntimeUnavailable(format!("Failed to connect: {e}")))?;
        Ok(Self { docker })
    }

    /// Wraps an existing bollard client.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Starts an exec and collects its output until the process exits.
    async fn run_exec(
        &self,
        id: &str,
        cmd: Vec<String>,
        workdir: Option<String>,
    ) -> Result<ExecOutput, SandboxError> {
        let options = CreateExecOptions {
            cmd: Some(cmd),
            working_dir: workdir,
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self.docker.create_exec(id, options).await.map_err(|e| {
            if is_not_found(&e) {
                SandboxError::NotFound { id: id.to_string() }
            } else {
                SandboxError::ExecFailed(format!("Failed to create exec: {e}"))
            }
        })?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::ExecFailed(format!("Failed to start exec: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(SandboxError::ExecFailed(format!(
                            "Error reading output: {e}"
                        )));
                    }
                }
            }
        }

        let info = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SandboxError::ExecFailed(format!("Failed to inspect exec: {e}")))?;

        Ok(ExecOutput {
            exit_code: info.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        debug!(image = image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| SandboxError::ImageUnavailable {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<String, SandboxError> {
        let host_config = HostConfig {
            memory: Some(spec.limits.memory_bytes()),
            cpu_period: Some(spec.limits.cpu_period()),
            cpu_quota: Some(spec.limits.cpu_quota()),
            pids_limit: Some(spec.limits.max_processes as i64),
            network_mode: Some(spec.limits.network_mode().to_string()),
            ..Default::default()
        };

        let env = spec.env_list();
        let labels: HashMap<String, String> = spec
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            env: if env.is_empty() { None } else { Some(env) },
            working_dir: Some(spec.working_dir.clone()),
            labels: Some(labels),
            host_config: Some(host_config),
            tty: Some(true),
            open_stdin: Some(true),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| SandboxError::CreateFailed(e.to_string()))?;

        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), SandboxError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::StartFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn exec(&self, id: &str, exec: &ExecSpec) -> Result<ExecOutput, SandboxError> {
        let cmd = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            EXEC_WRAPPER.to_string(),
            "termbench-exec".to_string(),
            pid_file(&exec.exec_id),
            exec.command.clone(),
        ];
        self.run_exec(id, cmd, exec.workdir.clone()).await
    }

    async fn terminate_exec(&self, id: &str, exec_id: &str) -> Result<(), SandboxError> {
        let cmd = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            KILL_TREE.to_string(),
            "termbench-kill".to_string(),
            pid_file(exec_id),
        ];
        let output = self.run_exec(id, cmd, None).await?;
        debug!(sandbox = id, exec_id = exec_id, exit_code = output.exit_code, "Terminated exec");
        Ok(())
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<(), SandboxError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    SandboxError::NotFound { id: id.to_string() }
                } else {
                    SandboxError::StopFailed {
                        id: id.to_string(),
                        reason: e.to_string(),
                    }
                }
            })
    }

    async fn remove(&self, id: &str) -> Result<(), SandboxError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    SandboxError::NotFound { id: id.to_string() }
                } else {
                    SandboxError::RemoveFailed {
                        id: id.to_string(),
                        reason: e.to_string(),
                    }
                }
            })
    }
}
