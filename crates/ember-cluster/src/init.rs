//! Init system seam.
//!
//! The node agent is a service unit supervised by the host init system.
//! Stages only need start/stop/status.

use async_trait::async_trait;
use tracing::debug;

use crate::ClusterError;

/// Service control surface of the host init system.
#[async_trait]
pub trait InitSystem: Send + Sync {
    async fn start(&self, unit: &str) -> Result<(), ClusterError>;

    async fn stop(&self, unit: &str) -> Result<(), ClusterError>;

    /// Whether the unit is currently active.
    async fn is_active(&self, unit: &str) -> Result<bool, ClusterError>;
}

/// systemd adapter via `systemctl`.
pub struct Systemd;

impl Systemd {
    async fn systemctl(&self, args: &[&str]) -> Result<std::process::Output, ClusterError> {
        tokio::process::Command::new("systemctl")
            .args(args)
            .output()
            .await
            .map_err(|e| ClusterError::Init(format!("cannot run systemctl: {e}")))
    }
}

#[async_trait]
impl InitSystem for Systemd {
    async fn start(&self, unit: &str) -> Result<(), ClusterError> {
        let output = self.systemctl(&["start", unit]).await?;
        if !output.status.success() {
            return Err(ClusterError::Init(format!(
                "systemctl start {unit} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn stop(&self, unit: &str) -> Result<(), ClusterError> {
        let output = self.systemctl(&["stop", unit]).await?;
        if !output.status.success() {
            // Stopping a unit that is not loaded is not a failure for our
            // purposes; the goal is only that it is not running.
            debug!(
                unit,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "systemctl stop reported failure"
            );
        }
        Ok(())
    }

    async fn is_active(&self, unit: &str) -> Result<bool, ClusterError> {
        let output = self.systemctl(&["is-active", unit]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "active")
    }
}
