//! Workflow orchestration.
//!
//! The stage list for a role is assembled exactly once at invocation time,
//! with every feature conditional resolved during assembly. Execution
//! dispatches each stage strictly in list order against the shared
//! configuration; the first failure aborts the run and is returned with
//! stage-identifying context. There is no cross-stage retry: retries, where
//! they exist, live inside a stage.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use ember_core::constants::{DEFAULT_AGENT_TIMEOUT, DEFAULT_AVAILABILITY_TIMEOUT};
use ember_core::{ControlPlaneConfiguration, Features, WorkerConfiguration};

use crate::init::InitSystem;
use crate::platform::PlatformClient;
use crate::runtime::RuntimeService;
use crate::stages;
use crate::store::FileStore;
use crate::watch::HealthProbe;
use crate::ClusterError;

/// Per-run tunables supplied by the caller.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub agent_timeout: Duration,
    pub availability_timeout: Duration,

    /// Stream component output live instead of buffering it for failure
    /// reports.
    pub verbose: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
            availability_timeout: DEFAULT_AVAILABILITY_TIMEOUT,
            verbose: false,
        }
    }
}

/// Collaborator handles and resolved features shared by every stage.
pub struct Engine {
    pub rc: RuntimeConfig,
    pub features: Features,
    pub platform: Arc<dyn PlatformClient>,
    pub runtime: Arc<dyn RuntimeService>,
    pub init: Arc<dyn InitSystem>,
    pub store: Arc<dyn FileStore>,
    pub agent_probe: Arc<dyn HealthProbe>,
    pub api_probe: Arc<dyn HealthProbe>,
}

/// Control-plane provisioning stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPlaneStage {
    Preflight,
    SharedCerts,
    NodeCerts,
    StopAgent,
    WriteCredentials,
    WriteAgentConfig,
    StartAgent,
    WriteManifests,
    WaitAvailable,
    WriteAuthdManifest,
    DeployDns,
    DeployProxy,
    EnableCertApprover,
    MarkControlPlane,
    PublishConfig,
    PublishAuxCa,
    PublishStoreSecrets,
}

impl ControlPlaneStage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Preflight => "precheck-control-plane",
            Self::SharedCerts => "cluster-certs",
            Self::NodeCerts => "node-certs",
            Self::StopAgent => "stop-agent",
            Self::WriteCredentials => "credentials",
            Self::WriteAgentConfig => "write-agent-config",
            Self::StartAgent => "start-agent",
            Self::WriteManifests => "component-manifests",
            Self::WaitAvailable => "cluster-available",
            Self::WriteAuthdManifest => "authd-manifest",
            Self::DeployDns => "deploy-dns",
            Self::DeployProxy => "deploy-proxy",
            Self::EnableCertApprover => "enable-cert-approver",
            Self::MarkControlPlane => "mark-control-plane",
            Self::PublishConfig => "publish-config",
            Self::PublishAuxCa => "publish-auth-proxy-ca",
            Self::PublishStoreSecrets => "publish-store-secrets",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Preflight => "perform host system configuration checks",
            Self::SharedCerts => "download or create cluster certs",
            Self::NodeCerts => "create node certs",
            Self::StopAgent => "stop node agent service",
            Self::WriteCredentials => "write credential bundles to disk",
            Self::WriteAgentConfig => "write the node agent configs",
            Self::StartAgent => "start node agent service",
            Self::WriteManifests => "write component manifests to disk",
            Self::WaitAvailable => "wait for cluster to become available",
            Self::WriteAuthdManifest => "write authorization server manifest to disk",
            Self::DeployDns => "deploy cluster DNS",
            Self::DeployProxy => "deploy service proxy",
            Self::EnableCertApprover => "allow automated approval of node certificates",
            Self::MarkControlPlane => "label and taint the control plane node",
            Self::PublishConfig => "publish cluster configuration",
            Self::PublishAuxCa => "publish self-signed auth-proxy ca",
            Self::PublishStoreSecrets => "publish shared store client secrets",
        }
    }

    async fn run(
        &self,
        engine: &Engine,
        cfg: &ControlPlaneConfiguration,
    ) -> Result<(), ClusterError> {
        match self {
            Self::Preflight => stages::preflight::control_plane(engine, cfg).await,
            Self::SharedCerts => stages::certs::create_or_download(engine, cfg).await,
            Self::NodeCerts => stages::certs::create_node_certs(engine, cfg).await,
            Self::StopAgent => stages::agent::stop(engine, &cfg.node).await,
            Self::WriteCredentials => {
                stages::credentials::write_control_plane_bundles(engine, cfg).await
            }
            Self::WriteAgentConfig => stages::agent::write_config(engine, &cfg.node).await,
            Self::StartAgent => stages::agent::start(engine, &cfg.node).await,
            Self::WriteManifests => stages::manifests::write_component_manifests(engine, cfg).await,
            Self::WaitAvailable => stages::available::wait_available(engine, cfg).await,
            Self::WriteAuthdManifest => stages::manifests::write_authd_manifest(engine, cfg).await,
            Self::DeployDns => stages::poststart::deploy_dns(engine, cfg).await,
            Self::DeployProxy => stages::poststart::deploy_proxy(engine, cfg).await,
            Self::EnableCertApprover => stages::poststart::enable_cert_approver(engine, cfg).await,
            Self::MarkControlPlane => stages::poststart::mark_control_plane(engine, cfg).await,
            Self::PublishConfig => stages::poststart::publish_config(engine, cfg).await,
            Self::PublishAuxCa => stages::poststart::publish_aux_ca(engine, cfg).await,
            Self::PublishStoreSecrets => stages::poststart::publish_store_secrets(engine, cfg).await,
        }
    }
}

/// Worker provisioning stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStage {
    Preflight,
    StopAgent,
    WriteJoinCredentials,
    WriteAgentConfig,
    StartAgent,
}

impl WorkerStage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Preflight => "precheck-worker",
            Self::StopAgent => "stop-agent",
            Self::WriteJoinCredentials => "join-credentials",
            Self::WriteAgentConfig => "write-agent-config",
            Self::StartAgent => "start-agent",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Preflight => "perform host system configuration checks",
            Self::StopAgent => "stop node agent service",
            Self::WriteJoinCredentials => "obtain a join credential and write it to disk",
            Self::WriteAgentConfig => "write the node agent configs",
            Self::StartAgent => "start node agent service",
        }
    }

    async fn run(&self, engine: &Engine, cfg: &WorkerConfiguration) -> Result<(), ClusterError> {
        match self {
            Self::Preflight => stages::preflight::worker(engine, cfg).await,
            Self::StopAgent => stages::agent::stop(engine, &cfg.node).await,
            Self::WriteJoinCredentials => {
                stages::credentials::write_join_credentials(engine, cfg).await
            }
            Self::WriteAgentConfig => stages::agent::write_config(engine, &cfg.node).await,
            Self::StartAgent => stages::agent::start(engine, &cfg.node).await,
        }
    }
}

/// Assemble the complete control-plane stage list for one run.
pub fn control_plane_stages(features: Features) -> Vec<ControlPlaneStage> {
    let mut list = vec![
        ControlPlaneStage::Preflight,
        ControlPlaneStage::SharedCerts,
        ControlPlaneStage::NodeCerts,
        ControlPlaneStage::StopAgent,
        ControlPlaneStage::WriteCredentials,
        ControlPlaneStage::WriteAgentConfig,
        ControlPlaneStage::StartAgent,
        ControlPlaneStage::WriteManifests,
        ControlPlaneStage::WaitAvailable,
    ];
    if features.handshake_server {
        list.push(ControlPlaneStage::WriteAuthdManifest);
    }
    list.extend([
        ControlPlaneStage::DeployDns,
        ControlPlaneStage::DeployProxy,
        ControlPlaneStage::EnableCertApprover,
        ControlPlaneStage::MarkControlPlane,
        ControlPlaneStage::PublishConfig,
    ]);
    if features.aux_trust_ca {
        list.push(ControlPlaneStage::PublishAuxCa);
    }
    if features.publish_store_secrets {
        list.push(ControlPlaneStage::PublishStoreSecrets);
    }
    list
}

/// Assemble the complete worker stage list for one run.
pub fn worker_stages() -> Vec<WorkerStage> {
    vec![
        WorkerStage::Preflight,
        WorkerStage::StopAgent,
        WorkerStage::WriteJoinCredentials,
        WorkerStage::WriteAgentConfig,
        WorkerStage::StartAgent,
    ]
}

/// Bootstrap a control-plane node.
pub async fn run_control_plane(
    engine: &Engine,
    cfg: &mut ControlPlaneConfiguration,
) -> Result<(), ClusterError> {
    cfg.apply_runtime_defaults();
    for stage in control_plane_stages(engine.features) {
        info!(stage = stage.name(), description = stage.description());
        stage
            .run(engine, cfg)
            .await
            .map_err(|source| ClusterError::Stage {
                stage: stage.name(),
                source: Box::new(source),
            })?;
    }
    Ok(())
}

/// Join a worker node.
pub async fn run_worker(engine: &Engine, cfg: &mut WorkerConfiguration) -> Result<(), ClusterError> {
    cfg.apply_runtime_defaults();
    for stage in worker_stages() {
        info!(stage = stage.name(), description = stage.description());
        stage
            .run(engine, cfg)
            .await
            .map_err(|source| ClusterError::Stage {
                stage: stage.name(),
                source: Box::new(source),
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use async_trait::async_trait;

    use crate::store::ClusterFile;
    use crate::testutil::{AlwaysHealthy, NullRuntime, RecordingInit};

    use super::*;

    #[test]
    fn test_control_plane_assembly_resolves_features() {
        let default = control_plane_stages(Features::default());
        assert!(!default.contains(&ControlPlaneStage::WriteAuthdManifest));
        assert!(!default.contains(&ControlPlaneStage::PublishAuxCa));
        assert!(default.contains(&ControlPlaneStage::PublishStoreSecrets));

        let features = Features::resolve(&HashMap::from([
            ("HandshakeServer".to_string(), true),
            ("AuxTrustCA".to_string(), true),
            ("PublishStoreSecrets".to_string(), false),
        ]))
        .unwrap();
        let gated = control_plane_stages(features);
        // The authd manifest lands between availability and service deploys.
        let wait = gated
            .iter()
            .position(|s| *s == ControlPlaneStage::WaitAvailable)
            .unwrap();
        assert_eq!(gated[wait + 1], ControlPlaneStage::WriteAuthdManifest);
        assert_eq!(gated[wait + 2], ControlPlaneStage::DeployDns);
        assert!(gated.contains(&ControlPlaneStage::PublishAuxCa));
        assert!(!gated.contains(&ControlPlaneStage::PublishStoreSecrets));
    }

    #[test]
    fn test_worker_assembly_order() {
        let names: Vec<_> = worker_stages().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "precheck-worker",
                "stop-agent",
                "join-credentials",
                "write-agent-config",
                "start-agent",
            ]
        );
    }

    struct FailingStore;

    #[async_trait]
    impl FileStore for FailingStore {
        async fn load_all(&self) -> Result<Vec<ClusterFile>, ClusterError> {
            Err(ClusterError::Store("store unreachable".to_string()))
        }

        async fn insert_all(&self, _files: Vec<ClusterFile>) -> Result<(), ClusterError> {
            Err(ClusterError::Store("store unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_first_failure_aborts_with_stage_context() {
        let dir = tempfile::tempdir().unwrap();
        let init = Arc::new(RecordingInit::new());
        let engine = Engine {
            rc: RuntimeConfig::default(),
            features: Features::default(),
            platform: Arc::new(crate::platform::MemoryPlatform::new()),
            runtime: Arc::new(NullRuntime),
            init: init.clone(),
            store: Arc::new(FailingStore),
            agent_probe: Arc::new(AlwaysHealthy),
            api_probe: Arc::new(AlwaysHealthy),
        };
        let mut cfg = ControlPlaneConfiguration {
            node: ember_core::NodeConfiguration {
                hostname: "cp-1".to_string(),
                host_ipv4: "10.0.0.5".to_string(),
                cluster_dir: PathBuf::from(dir.path()),
                platform_version: "1.2.0".to_string(),
                ..ember_core::NodeConfiguration::default()
            },
            ..ControlPlaneConfiguration::default()
        };

        let err = run_control_plane(&engine, &mut cfg).await.unwrap_err();
        match err {
            ClusterError::Stage { stage, source } => {
                assert_eq!(stage, "cluster-certs");
                assert!(source.to_string().contains("store unreachable"));
            }
            other => panic!("expected stage error, got {other}"),
        }
        // Fail-fast: no later stage ran.
        assert!(init.stopped().is_empty());
        assert!(init.started().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_preflight() {
        let init = Arc::new(RecordingInit::new());
        let engine = Engine {
            rc: RuntimeConfig::default(),
            features: Features::default(),
            platform: Arc::new(crate::platform::MemoryPlatform::new()),
            runtime: Arc::new(NullRuntime),
            init,
            store: Arc::new(crate::store::MemoryFileStore::new()),
            agent_probe: Arc::new(AlwaysHealthy),
            api_probe: Arc::new(AlwaysHealthy),
        };
        let mut cfg = WorkerConfiguration::default();
        cfg.node.platform_version = "bogus".to_string();
        let err = run_worker(&engine, &mut cfg).await.unwrap_err();
        match err {
            ClusterError::Stage { stage, .. } => assert_eq!(stage, "precheck-worker"),
            other => panic!("expected stage error, got {other}"),
        }
    }
}
