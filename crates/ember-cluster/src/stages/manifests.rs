//! Component manifest stages.

use ember_core::ControlPlaneConfiguration;

use crate::components;
use crate::engine::Engine;
use crate::ClusterError;

pub async fn write_component_manifests(
    _engine: &Engine,
    cfg: &ControlPlaneConfiguration,
) -> Result<(), ClusterError> {
    let dir = cfg.node.manifest_dir();
    components::write_manifest(&dir, &components::api_server_manifest(cfg))?;
    components::write_manifest(&dir, &components::controller_manager_manifest(cfg))?;
    components::write_manifest(&dir, &components::scheduler_manifest(cfg))?;
    Ok(())
}

pub async fn write_authd_manifest(
    _engine: &Engine,
    cfg: &ControlPlaneConfiguration,
) -> Result<(), ClusterError> {
    components::write_manifest(&cfg.node.manifest_dir(), &components::authd_manifest(cfg))
}
