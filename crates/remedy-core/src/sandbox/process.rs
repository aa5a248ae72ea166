//! Local process sandbox.
//!
//! Runs the job in a fresh temp directory as a child process in its own
//! process group. Isolation is weaker than a container: memory is capped with
//! `ulimit -v`, priority is lowered with `nice` when available, and network
//! access is removed with an unprivileged `unshare -rn` when requested.
//! `cpu_limit` is not enforced here; only the Docker backend applies it.
//! Suitable for development hosts without Docker.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use which::which;

use super::workspace::{has_manifest, materialize, release};
use super::{RawOutput, SandboxBackend, SandboxJob, SandboxLimits};
use crate::errors::SandboxError;
use crate::sandbox::Language;

const NICENESS: &str = "10";
const KILL_AFTER_SECS: &str = "1";
const FALLBACK_GRACE: Duration = Duration::from_secs(2);
const DRAIN_GRACE: Duration = Duration::from_secs(1);
// coreutils `timeout` exit codes: expired, and expired then SIGKILLed
const TIMEOUT_EXIT_CODE: i32 = 124;
const TIMEOUT_KILLED_EXIT_CODE: i32 = 137;
const MEMORY_PROBE_KB: &str = "1048576";

// Applies the memory ceiling, then replaces the shell with the target so
// that killing the child kills the program itself.
const LIMIT_WRAPPER: &str = r#"ulimit -v "$1" 2>/dev/null; shift; exec "$@""#;

pub struct ProcessSandbox {
    language: Language,
    network_disabled: bool,
    cpu_notice: AtomicBool,
}

/// Kills every process left in the group when dropped.
struct ProcessGroup(Pid);

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        match killpg(self.0, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => log::warn!("Failed to kill sandbox process group {}: {}", self.0, e),
        }
    }
}

impl ProcessSandbox {
    /// `language` and `network_disabled` decide what the probe looks for.
    pub fn new(language: Language, network_disabled: bool) -> Self {
        Self {
            language,
            network_disabled,
            cpu_notice: AtomicBool::new(false),
        }
    }

    fn find_tool(&self, name: &str) -> Option<PathBuf> {
        which(name).ok()
    }

    fn build_command(
        &self,
        program: &[String],
        workdir: &Path,
        limits: &SandboxLimits,
        remaining: Duration,
        isolate_network: bool,
    ) -> (Command, bool) {
        let mut argv: Vec<String> = Vec::new();
        // `timeout` kills the whole group on expiry, grandchildren included
        let group_timeout = self.find_tool("timeout").is_some();
        if group_timeout {
            let secs = remaining.as_secs_f64().ceil().max(1.0) as u64;
            argv.extend([
                "timeout".to_string(),
                "-k".to_string(),
                KILL_AFTER_SECS.to_string(),
                secs.to_string(),
            ]);
        }
        let niced = self.find_tool("nice").is_some();
        if niced {
            argv.extend(["nice".to_string(), "-n".to_string(), NICENESS.to_string()]);
        }
        if !self.cpu_notice.swap(true, Ordering::Relaxed) {
            log::warn!(
                "Process sandbox does not enforce cpu_limit={}; {}",
                limits.cpu_limit,
                if niced {
                    "runs are only deprioritized with nice"
                } else {
                    "'nice' not found, runs keep normal priority"
                }
            );
        }
        if isolate_network {
            argv.extend(["unshare".to_string(), "-rn".to_string()]);
        }
        argv.extend(program.iter().cloned());

        // V8 reserves far more address space than it uses; an address-space
        // cap kills node at startup
        let memory_kb = if self.language == Language::Node {
            "unlimited".to_string()
        } else {
            limits.memory_limit_mb.saturating_mul(1024).to_string()
        };
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(LIMIT_WRAPPER)
            .arg("sh")
            .arg(memory_kb)
            .args(&argv)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        (cmd, group_timeout)
    }

    async fn run_step(
        (mut cmd, group_timeout): (Command, bool),
        deadline: Instant,
    ) -> Result<RawOutput, SandboxError> {
        let mut child = cmd.spawn()?;
        let group = child.id().map(|id| ProcessGroup(Pid::from_raw(id as i32)));
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        // Fallback guard in case `timeout` is missing or ignored the signal
        let waited = tokio::time::timeout_at(deadline + FALLBACK_GRACE, child.wait()).await;
        // The run ends when the direct child does; background leftovers go
        // with the group, which also closes their copies of the pipes
        drop(group);
        let status = match waited {
            Ok(status) => status?,
            Err(_) => return Err(SandboxError::Timeout),
        };

        let exit_code = status.code().unwrap_or(-1);
        let expired = Instant::now() >= deadline;
        if group_timeout && expired && (exit_code == TIMEOUT_EXIT_CODE || exit_code == TIMEOUT_KILLED_EXIT_CODE) {
            return Err(SandboxError::Timeout);
        }

        Ok(RawOutput {
            exit_code,
            stdout: collect(stdout).await,
            stderr: collect(stderr).await,
        })
    }

    async fn run_in(
        &self,
        job: &SandboxJob<'_>,
        limits: &SandboxLimits,
        workdir: &Path,
        deadline: Instant,
    ) -> Result<RawOutput, SandboxError> {
        let workdir_str = workdir
            .to_str()
            .ok_or_else(|| SandboxError::WorkspaceError("Invalid temp path".to_string()))?;

        if let Some(install) = job.language.install_command().filter(|_| has_manifest(job)) {
            log::debug!("Installing dependencies for '{}'", job.entry_point);
            let remaining = deadline.saturating_duration_since(Instant::now());
            let cmd = self.build_command(&install, workdir, limits, remaining, false);
            let output = Self::run_step(cmd, deadline).await?;
            if output.exit_code != 0 {
                log::warn!("Dependency installation failed with exit code {}", output.exit_code);
                return Ok(output);
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(SandboxError::Timeout);
        }
        let mut cmd = self.build_command(
            &job.language.run_command(job.entry_point),
            workdir,
            limits,
            remaining,
            limits.network_disabled,
        );
        cmd.0.envs(job.language.runtime_env(workdir_str));
        cmd.0.envs(job.env.iter());

        Self::run_step(cmd, deadline).await
    }

    async fn probe_network_isolation(&self) -> Result<(), SandboxError> {
        if self.find_tool("unshare").is_none() {
            return Err(SandboxError::Unavailable(
                "network isolation requested but 'unshare' not found on PATH".to_string(),
            ));
        }
        let output = Command::new("unshare")
            .args(["-rn", "true"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;
        if output.status.success() {
            return Ok(());
        }
        Err(SandboxError::Unavailable(format!(
            "network isolation requested but 'unshare -rn' failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }

    async fn memory_cap_supported(&self) -> bool {
        Command::new("sh")
            .arg("-c")
            .arg(format!("ulimit -v {}", MEMORY_PROBE_KB))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

fn drain<R>(mut pipe: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            log::debug!("Stopped reading sandbox output: {}", e);
        }
        buf
    })
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    match tokio::time::timeout(DRAIN_GRACE, &mut reader).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).to_string(),
        Ok(Err(e)) => {
            log::warn!("Sandbox output reader failed: {}", e);
            String::new()
        }
        Err(_) => {
            // a process that left the group still holds the pipe
            reader.abort();
            log::warn!("Sandbox output pipe held open by a detached process");
            String::new()
        }
    }
}

#[async_trait]
impl SandboxBackend for ProcessSandbox {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn probe(&self) -> Result<(), SandboxError> {
        if self.find_tool("sh").is_none() {
            return Err(SandboxError::Unavailable("'sh' not found on PATH".to_string()));
        }
        let interpreter = self.language.interpreter();
        if self.find_tool(interpreter).is_none() {
            return Err(SandboxError::Unavailable(format!(
                "interpreter '{}' not found on PATH",
                interpreter
            )));
        }
        if self.network_disabled {
            self.probe_network_isolation().await?;
        }
        if !self.memory_cap_supported().await {
            log::warn!("'ulimit -v' is not supported here; process sandbox runs without a memory ceiling");
        }
        Ok(())
    }

    async fn run(&self, job: &SandboxJob<'_>, limits: &SandboxLimits) -> Result<RawOutput, SandboxError> {
        let deadline = Instant::now() + limits.timeout;
        let workspace = materialize(job)?;
        let outcome = self.run_in(job, limits, workspace.path(), deadline).await;
        release(workspace);
        outcome
    }
}
