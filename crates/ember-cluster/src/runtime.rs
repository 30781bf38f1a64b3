//! Container runtime query seam.
//!
//! The runtime's own query API is an external collaborator; ember only
//! needs to locate managed component containers by label, inspect their
//! status, and read their logs. [`CrictlRuntime`] adapts the runtime's CLI
//! rather than vendoring its RPC surface.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use ember_core::constants::COMPONENT_LABEL;

use crate::ClusterError;

/// A located managed component container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
}

/// Point-in-time status of a container.
#[derive(Debug, Clone)]
pub struct ContainerStatus {
    pub exit_code: i32,
    pub log_path: PathBuf,
}

/// Query interface over the local container runtime.
#[async_trait]
pub trait RuntimeService: Send + Sync {
    /// List containers carrying the component label with the given value.
    async fn list_components(&self, component: &str) -> Result<Vec<ContainerHandle>, ClusterError>;

    async fn container_status(&self, id: &str) -> Result<ContainerStatus, ClusterError>;

    async fn read_logs(&self, path: &Path) -> Result<String, ClusterError>;

    /// Follow a log file, writing each new line to stdout with a tab
    /// prefix, until cancelled.
    async fn tail_logs(&self, path: &Path) -> Result<(), ClusterError>;
}

/// Adapter shelling out to the runtime CLI (`crictl`).
pub struct CrictlRuntime {
    socket: String,
}

#[derive(Deserialize)]
struct PsOutput {
    #[serde(default)]
    containers: Vec<PsContainer>,
}

#[derive(Deserialize)]
struct PsContainer {
    id: String,
}

#[derive(Deserialize)]
struct InspectOutput {
    status: InspectStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InspectStatus {
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    log_path: String,
}

impl CrictlRuntime {
    pub fn new(socket: impl Into<String>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    async fn crictl(&self, args: &[&str]) -> Result<Vec<u8>, ClusterError> {
        let output = tokio::process::Command::new("crictl")
            .arg("-r")
            .arg(&self.socket)
            .args(args)
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ClusterError::Runtime(format!("cannot run crictl: {e}")))?;
        if !output.status.success() {
            return Err(ClusterError::Runtime(format!(
                "crictl {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl RuntimeService for CrictlRuntime {
    async fn list_components(&self, component: &str) -> Result<Vec<ContainerHandle>, ClusterError> {
        let label = format!("{COMPONENT_LABEL}={component}");
        let stdout = self
            .crictl(&["ps", "--label", &label, "-o", "json"])
            .await?;
        let parsed: PsOutput = serde_json::from_slice(&stdout)
            .map_err(|e| ClusterError::Runtime(format!("cannot parse crictl ps output: {e}")))?;
        Ok(parsed
            .containers
            .into_iter()
            .map(|c| ContainerHandle { id: c.id })
            .collect())
    }

    async fn container_status(&self, id: &str) -> Result<ContainerStatus, ClusterError> {
        let stdout = self.crictl(&["inspect", id]).await?;
        let parsed: InspectOutput = serde_json::from_slice(&stdout).map_err(|e| {
            ClusterError::Runtime(format!("cannot parse crictl inspect output: {e}"))
        })?;
        Ok(ContainerStatus {
            exit_code: parsed.status.exit_code,
            log_path: PathBuf::from(parsed.status.log_path),
        })
    }

    async fn read_logs(&self, path: &Path) -> Result<String, ClusterError> {
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn tail_logs(&self, path: &Path) -> Result<(), ClusterError> {
        let mut offset = 0u64;
        let mut stdout = tokio::io::stdout();
        loop {
            match tokio::fs::read(path).await {
                Ok(data) => {
                    if (data.len() as u64) > offset {
                        let fresh = &data[offset as usize..];
                        for line in String::from_utf8_lossy(fresh).lines() {
                            stdout.write_all(format!("\t{line}\n").as_bytes()).await?;
                        }
                        offset = data.len() as u64;
                    }
                }
                Err(e) => debug!(path = %path.display(), error = %e, "cannot read log path"),
            }
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }
    }
}
