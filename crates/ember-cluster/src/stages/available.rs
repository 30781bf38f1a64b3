//! Availability waiting stage.

use std::time::Duration;

use ember_core::constants::API_SERVER_COMPONENT;
use ember_core::ControlPlaneConfiguration;

use crate::engine::Engine;
use crate::watch::AvailabilityWatcher;
use crate::ClusterError;

pub async fn wait_available(
    engine: &Engine,
    cfg: &ControlPlaneConfiguration,
) -> Result<(), ClusterError> {
    let watcher = AvailabilityWatcher {
        runtime: engine.runtime.clone(),
        init: engine.init.clone(),
        probe: engine.api_probe.clone(),
        component: API_SERVER_COMPONENT.to_string(),
        agent_service: cfg.node.agent_service.clone(),
        timeout: engine.rc.availability_timeout,
        poll_interval: Duration::from_millis(500),
        verbose: engine.rc.verbose,
    };
    watcher.wait_available().await
}
