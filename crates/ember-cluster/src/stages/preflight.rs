//! Pre-flight validation.
//!
//! Runtime defaulting has already been applied at invocation time; this
//! stage rejects configurations that would fail later, before any external
//! call is made, reporting every problem at once.

use ember_core::{ControlPlaneConfiguration, WorkerConfiguration};

use crate::engine::Engine;
use crate::ClusterError;

pub async fn control_plane(
    _engine: &Engine,
    cfg: &ControlPlaneConfiguration,
) -> Result<(), ClusterError> {
    cfg.validate().map_err(ClusterError::from)
}

pub async fn worker(_engine: &Engine, cfg: &WorkerConfiguration) -> Result<(), ClusterError> {
    cfg.validate().map_err(ClusterError::from)
}
