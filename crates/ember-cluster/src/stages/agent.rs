//! Node agent stages.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use ember_core::constants::AGENT_HEALTH_PORT;
use ember_core::NodeConfiguration;

use crate::engine::Engine;
use crate::ClusterError;

const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

const AGENT_FAILURE_MESSAGE: &str = "attempt to start the node agent service was not successful; \
the agent is required to start managed components, so the cluster will not be available. \
Check the full logs in the init system journal";

pub async fn stop(engine: &Engine, cfg: &NodeConfiguration) -> Result<(), ClusterError> {
    engine.init.stop(&cfg.agent_service).await
}

/// Write the node agent's configuration file.
pub async fn write_config(_engine: &Engine, cfg: &NodeConfiguration) -> Result<(), ClusterError> {
    let config = serde_json::json!({
        "client_ca_file": cfg.pki_dir().join("ca.crt"),
        "manifest_dir": cfg.manifest_dir(),
        "rotate_certificates": true,
        "runtime_socket": cfg.runtime_socket,
        "health_port": AGENT_HEALTH_PORT,
    });
    std::fs::create_dir_all(&cfg.cluster_dir)?;
    std::fs::write(
        cfg.cluster_dir.join("agent-config.json"),
        serde_json::to_vec_pretty(&config)?,
    )?;
    Ok(())
}

/// Start the node agent and wait for it to report ready: the unit must be
/// active and its local health endpoint answering.
pub async fn start(engine: &Engine, cfg: &NodeConfiguration) -> Result<(), ClusterError> {
    engine.init.start(&cfg.agent_service).await?;

    let deadline = Instant::now() + engine.rc.agent_timeout;
    loop {
        match engine.init.is_active(&cfg.agent_service).await {
            Ok(true) => {
                if engine.agent_probe.healthy().await {
                    return Ok(());
                }
                debug!(unit = %cfg.agent_service, "agent unit active, health endpoint not ready");
            }
            Ok(false) => debug!(unit = %cfg.agent_service, "agent unit not active yet"),
            Err(e) => debug!(unit = %cfg.agent_service, error = %e, "cannot query agent unit"),
        }
        if Instant::now() + READINESS_POLL_INTERVAL > deadline {
            return Err(ClusterError::AgentNotReady(
                AGENT_FAILURE_MESSAGE.to_string(),
            ));
        }
        tokio::time::sleep(READINESS_POLL_INTERVAL).await;
    }
}
