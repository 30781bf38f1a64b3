//! Credential bundle stages.

use ember_bootstrap::JoinOptions;
use ember_core::{ControlPlaneConfiguration, WorkerConfiguration};

use crate::engine::Engine;
use crate::ClusterError;

pub async fn write_control_plane_bundles(
    _engine: &Engine,
    cfg: &ControlPlaneConfiguration,
) -> Result<(), ClusterError> {
    crate::bundle::write_control_plane_bundles(cfg)
}

/// Obtain a join credential for a worker: the pre-shared token when one is
/// configured, otherwise the dynamic handshake against the authorization
/// server. The resulting bundle is what the node agent boots with.
pub async fn write_join_credentials(
    _engine: &Engine,
    cfg: &WorkerConfiguration,
) -> Result<(), ClusterError> {
    let bundle = ember_bootstrap::bootstrap_credentials(cfg, &JoinOptions::default()).await?;
    bundle.write_to_file(&cfg.node.cluster_dir.join("agent-bootstrap.conf"))?;
    Ok(())
}
