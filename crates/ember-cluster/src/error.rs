//! Cluster provisioning errors.

use std::fmt;

use thiserror::Error;

/// Errors surfaced by the provisioning pipeline.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A stage failed; the run is aborted and this error is returned to the
    /// caller with the failing stage's name attached.
    #[error("stage {stage:?} failed: {source}")]
    Stage {
        stage: &'static str,
        source: Box<ClusterError>,
    },

    #[error(transparent)]
    Config(#[from] ember_core::ConfigError),

    #[error(transparent)]
    Pki(#[from] ember_pki::PkiError),

    #[error(transparent)]
    Bootstrap(#[from] ember_bootstrap::BootstrapError),

    #[error("shared store error: {0}")]
    Store(String),

    /// Another node inserted the shared cluster files first. Callers must
    /// re-read and download.
    #[error("shared cluster files already created by another node")]
    StoreConflict,

    #[error("platform API error: {0}")]
    Platform(String),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("init system error: {0}")]
    Init(String),

    /// A managed component crashed while waiting for availability.
    #[error("{0}")]
    ComponentFailed(ComponentFailure),

    #[error(transparent)]
    DeadlineExceeded(#[from] tokio::time::error::Elapsed),

    #[error("{0}")]
    AgentNotReady(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Details of a crashed managed component, including any log segment
/// recovered from the runtime's log directory.
#[derive(Debug)]
pub struct ComponentFailure {
    pub name: String,
    pub exit_code: i32,
    pub logs: Option<String>,
}

impl fmt::Display for ComponentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} container exited with code: {}",
            self.name, self.exit_code
        )?;
        if let Some(logs) = &self.logs {
            writeln!(f)?;
            for line in logs.lines() {
                writeln!(f, "\t{}", line)?;
            }
        }
        Ok(())
    }
}
