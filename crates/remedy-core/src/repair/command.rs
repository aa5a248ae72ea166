//! Repair capability backed by an external command.
//!
//! The command runs through `sh -c`, receives the [`RepairRequest`] as JSON on
//! stdin and must print the corrected file on stdout. A non-zero exit, a
//! timeout or unreadable output all count as a failed attempt.

use super::{RepairCapability, RepairRequest};
use crate::errors::RepairError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub const DEFAULT_REPAIR_TIMEOUT: Duration = Duration::from_secs(120);
const STDERR_PREVIEW_CHARS: usize = 300;

pub struct CommandRepair {
    command: String,
    timeout: Duration,
}

impl CommandRepair {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: DEFAULT_REPAIR_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn invoke(&self, payload: Vec<u8>) -> Result<String, RepairError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // commands that ignore stdin may close it early
                if let Err(e) = stdin.write_all(&payload).await {
                    log::debug!("Repair command closed stdin early: {}", e);
                }
                // dropping stdin sends EOF
            }
        };
        // stdout is drained while the request is still being written
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let preview: String = stderr.trim().chars().take(STDERR_PREVIEW_CHARS).collect();
            return Err(RepairError::Failed(format!(
                "repair command exited with {}: {}",
                output.status.code().unwrap_or(-1),
                preview
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| RepairError::Failed(format!("repair command printed invalid UTF-8: {}", e)))
    }
}

#[async_trait]
impl RepairCapability for CommandRepair {
    async fn repair(&self, request: &RepairRequest) -> Result<String, RepairError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| RepairError::Failed(format!("could not encode repair request: {}", e)))?;

        log::debug!("Requesting repair of '{}' from '{}'", request.path, self.command);
        tokio::time::timeout(self.timeout, self.invoke(payload))
            .await
            .map_err(|_| RepairError::Timeout)?
    }
}
