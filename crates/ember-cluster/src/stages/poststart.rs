//! Post-availability stages: baseline services, credential approval, node
//! marking, and publishing cluster state through the platform API.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use ember_core::constants::{CLUSTER_CONFIG_NAME, TOKEN_EXTRA_GROUPS};
use ember_core::{net, ControlPlaneConfiguration};

use crate::engine::Engine;
use crate::platform::Taint;
use crate::ClusterError;

/// Label and taint applied to control-plane nodes.
const CONTROL_PLANE_ROLE: &str = "node-role.ember.io/control-plane";

pub async fn deploy_dns(engine: &Engine, cfg: &ControlPlaneConfiguration) -> Result<(), ClusterError> {
    let service_ip = net::dns_ip(&cfg.service_subnet)
        .map(|ip| ip.to_string())
        .unwrap_or_default();
    engine
        .platform
        .apply_manifest(&serde_json::json!({
            "name": "cluster-dns",
            "kind": "deployment",
            "image": format!("ember/dns:v{}", cfg.node.platform_version),
            "service_ip": service_ip,
        }))
        .await
}

pub async fn deploy_proxy(
    engine: &Engine,
    cfg: &ControlPlaneConfiguration,
) -> Result<(), ClusterError> {
    engine
        .platform
        .apply_manifest(&serde_json::json!({
            "name": "service-proxy",
            "kind": "daemonset",
            "image": format!("ember/proxy:v{}", cfg.node.platform_version),
            "cluster_cidr": cfg.pod_subnet,
        }))
        .await
}

/// Grant the credential approver permission to approve certificate
/// requests from nodes that joined with a bootstrap token, so their client
/// certificates are issued without operator involvement.
pub async fn enable_cert_approver(
    engine: &Engine,
    _cfg: &ControlPlaneConfiguration,
) -> Result<(), ClusterError> {
    engine
        .platform
        .apply_manifest(&serde_json::json!({
            "name": "ember-cert-approver",
            "kind": "role",
            "rules": [{
                "resources": ["certificaterequests"],
                "verbs": ["approve"],
            }],
        }))
        .await?;
    engine
        .platform
        .apply_manifest(&serde_json::json!({
            "name": "ember-cert-approver",
            "kind": "rolebinding",
            "role": "ember-cert-approver",
            "subjects": [
                { "kind": "group", "name": "system:nodes" },
                { "kind": "group", "name": TOKEN_EXTRA_GROUPS },
            ],
        }))
        .await
}

pub async fn mark_control_plane(
    engine: &Engine,
    cfg: &ControlPlaneConfiguration,
) -> Result<(), ClusterError> {
    let mut labels = BTreeMap::new();
    labels.insert(CONTROL_PLANE_ROLE.to_string(), String::new());
    engine
        .platform
        .patch_node(
            &cfg.node.hostname,
            labels,
            vec![Taint {
                key: CONTROL_PLANE_ROLE.to_string(),
                effect: "NoSchedule".to_string(),
            }],
        )
        .await
}

/// Publish the cluster configuration and CA so joining nodes can discover
/// both, along with read access for nodes and bootstrappers.
pub async fn publish_config(
    engine: &Engine,
    cfg: &ControlPlaneConfiguration,
) -> Result<(), ClusterError> {
    let ca = std::fs::read(cfg.node.pki_dir().join("ca.crt"))?;
    let mut data = BTreeMap::new();
    data.insert("ca".to_string(), BASE64.encode(&ca));
    data.insert("config".to_string(), serde_json::to_string(cfg)?);
    engine.platform.upsert_config(CLUSTER_CONFIG_NAME, data).await?;

    engine
        .platform
        .apply_manifest(&serde_json::json!({
            "name": CLUSTER_CONFIG_NAME,
            "kind": "role",
            "rules": [{
                "resources": ["configs"],
                "resource_names": [CLUSTER_CONFIG_NAME],
                "verbs": ["get"],
            }],
        }))
        .await?;
    engine
        .platform
        .apply_manifest(&serde_json::json!({
            "name": CLUSTER_CONFIG_NAME,
            "kind": "rolebinding",
            "role": CLUSTER_CONFIG_NAME,
            "subjects": [
                { "kind": "group", "name": "system:nodes" },
                { "kind": "group", "name": TOKEN_EXTRA_GROUPS },
            ],
        }))
        .await
}

pub async fn publish_aux_ca(
    engine: &Engine,
    cfg: &ControlPlaneConfiguration,
) -> Result<(), ClusterError> {
    let pki = cfg.node.pki_dir();
    let mut data = BTreeMap::new();
    data.insert(
        "tls.crt".to_string(),
        std::fs::read_to_string(pki.join("auth-proxy-ca.crt"))?,
    );
    data.insert(
        "tls.key".to_string(),
        std::fs::read_to_string(pki.join("auth-proxy-ca.key"))?,
    );
    engine.platform.upsert_secret("ember-auth-proxy-ca", data).await
}

pub async fn publish_store_secrets(
    engine: &Engine,
    cfg: &ControlPlaneConfiguration,
) -> Result<(), ClusterError> {
    let mut data = BTreeMap::new();
    data.insert(
        "ca.crt".to_string(),
        std::fs::read_to_string(&cfg.store.ca_file)?,
    );
    data.insert(
        "client.crt".to_string(),
        std::fs::read_to_string(&cfg.store.cert_file)?,
    );
    data.insert(
        "client.key".to_string(),
        std::fs::read_to_string(&cfg.store.key_file)?,
    );
    engine.platform.upsert_secret("ember-store-client", data).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ember_core::{Features, NodeConfiguration};

    use crate::engine::{Engine, RuntimeConfig};
    use crate::platform::MemoryPlatform;
    use crate::testutil;

    use super::*;

    fn engine(platform: Arc<MemoryPlatform>) -> Engine {
        Engine {
            rc: RuntimeConfig::default(),
            features: Features::default(),
            platform,
            runtime: Arc::new(testutil::NullRuntime),
            init: Arc::new(testutil::RecordingInit::new()),
            store: Arc::new(crate::store::MemoryFileStore::new()),
            agent_probe: Arc::new(testutil::AlwaysHealthy),
            api_probe: Arc::new(testutil::AlwaysHealthy),
        }
    }

    fn config(dir: &std::path::Path) -> ControlPlaneConfiguration {
        let mut cfg = ControlPlaneConfiguration {
            node: NodeConfiguration {
                hostname: "cp-1".to_string(),
                host_ipv4: "10.0.0.5".to_string(),
                cluster_dir: dir.to_path_buf(),
                platform_version: "1.2.0".to_string(),
                ..NodeConfiguration::default()
            },
            ..ControlPlaneConfiguration::default()
        };
        cfg.apply_runtime_defaults();
        cfg
    }

    #[tokio::test]
    async fn test_mark_control_plane() {
        let platform = Arc::new(MemoryPlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(platform.clone());
        mark_control_plane(&engine, &config(dir.path())).await.unwrap();

        let state = platform.state.lock().unwrap();
        let (node, labels, taints) = &state.node_patches[0];
        assert_eq!(node, "cp-1");
        assert!(labels.contains_key(CONTROL_PLANE_ROLE));
        assert_eq!(taints[0].effect, "NoSchedule");
    }

    #[tokio::test]
    async fn test_publish_config_includes_ca() {
        let platform = Arc::new(MemoryPlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        std::fs::create_dir_all(cfg.node.pki_dir()).unwrap();
        std::fs::write(cfg.node.pki_dir().join("ca.crt"), b"PEM BYTES").unwrap();

        let engine = engine(platform.clone());
        publish_config(&engine, &cfg).await.unwrap();

        let state = platform.state.lock().unwrap();
        let published = &state.configs[CLUSTER_CONFIG_NAME];
        assert_eq!(published["ca"], BASE64.encode(b"PEM BYTES"));
        assert!(published["config"].contains("\"hostname\":\"cp-1\""));
        assert_eq!(state.manifests.len(), 2);
    }
}
