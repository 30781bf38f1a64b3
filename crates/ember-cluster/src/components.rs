//! Managed component manifests.
//!
//! Pure data construction: each control-plane process is described by a
//! small manifest the node agent supervises directly. Templating beyond
//! this lives outside ember.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use ember_core::constants::{API_SERVER_COMPONENT, COMPONENT_LABEL, DEFAULT_AUTHD_PORT};
use ember_core::ControlPlaneConfiguration;

use crate::ClusterError;

/// A managed component supervised by the node agent.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentManifest {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

fn labels(component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(COMPONENT_LABEL.to_string(), component.to_string());
    labels
}

pub fn api_server_manifest(cfg: &ControlPlaneConfiguration) -> ComponentManifest {
    let pki = cfg.node.pki_dir();
    ComponentManifest {
        name: API_SERVER_COMPONENT.to_string(),
        image: format!("ember/apiserver:v{}", cfg.node.platform_version),
        command: vec![
            "ember-apiserver".to_string(),
            format!("--bind-port={}", cfg.api_bind_port),
            format!("--advertise-address={}", cfg.node.host_ipv4),
            format!("--service-subnet={}", cfg.service_subnet),
            format!("--client-ca-file={}", pki.join("ca.crt").display()),
            format!("--tls-cert-file={}", pki.join("apiserver.crt").display()),
            format!("--tls-key-file={}", pki.join("apiserver.key").display()),
            format!(
                "--agent-client-cert-file={}",
                pki.join("apiserver-agent-client.crt").display()
            ),
            format!(
                "--agent-client-key-file={}",
                pki.join("apiserver-agent-client.key").display()
            ),
            format!(
                "--front-proxy-ca-file={}",
                pki.join("front-proxy-ca.crt").display()
            ),
            format!(
                "--service-account-key-file={}",
                pki.join("sa.pub").display()
            ),
            format!("--store-endpoint={}", cfg.store.client_addr()),
        ],
        labels: labels(API_SERVER_COMPONENT),
    }
}

pub fn controller_manager_manifest(cfg: &ControlPlaneConfiguration) -> ComponentManifest {
    let pki = cfg.node.pki_dir();
    ComponentManifest {
        name: "ember-controller-manager".to_string(),
        image: format!("ember/controller-manager:v{}", cfg.node.platform_version),
        command: vec![
            "ember-controller-manager".to_string(),
            format!(
                "--credentials={}",
                cfg.node.cluster_dir.join("controller-manager.conf").display()
            ),
            format!("--cluster-ca-file={}", pki.join("ca.crt").display()),
            format!("--cluster-ca-key-file={}", pki.join("ca.key").display()),
            format!(
                "--service-account-key-file={}",
                pki.join("sa.key").display()
            ),
            format!("--pod-subnet={}", cfg.pod_subnet),
        ],
        labels: labels("ember-controller-manager"),
    }
}

pub fn scheduler_manifest(cfg: &ControlPlaneConfiguration) -> ComponentManifest {
    ComponentManifest {
        name: "ember-scheduler".to_string(),
        image: format!("ember/scheduler:v{}", cfg.node.platform_version),
        command: vec![
            "ember-scheduler".to_string(),
            format!(
                "--credentials={}",
                cfg.node.cluster_dir.join("scheduler.conf").display()
            ),
        ],
        labels: labels("ember-scheduler"),
    }
}

/// The handshake authorization server, run as a managed component so that
/// joining workers can reach it as soon as the control plane is up.
pub fn authd_manifest(cfg: &ControlPlaneConfiguration) -> ComponentManifest {
    let pki = cfg.node.pki_dir();
    let mut command = vec![
        "ember-authd".to_string(),
        format!("--port={DEFAULT_AUTHD_PORT}"),
        format!("--provider={}", cfg.handshake.provider),
        format!("--provider-key={}", cfg.handshake.provider_key.display()),
        format!("--instance-api={}", cfg.handshake.instance_api),
        format!("--cert={}", pki.join("apiserver.crt").display()),
        format!("--key={}", pki.join("apiserver.key").display()),
        format!(
            "--bundle={}",
            cfg.node.cluster_dir.join("admin.conf").display()
        ),
    ];
    for (key, value) in &cfg.handshake.filters {
        command.push(format!("--filter={key}={value}"));
    }
    ComponentManifest {
        name: "ember-authd".to_string(),
        image: format!("ember/authd:v{}", cfg.node.platform_version),
        command,
        labels: labels("ember-authd"),
    }
}

/// Write a manifest as `<dir>/<name>.json`.
pub fn write_manifest(dir: &Path, manifest: &ComponentManifest) -> Result<(), ClusterError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", manifest.name));
    std::fs::write(path, serde_json::to_vec_pretty(manifest)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use ember_core::NodeConfiguration;

    use super::*;

    #[test]
    fn test_manifests_carry_component_label() {
        let cfg = ControlPlaneConfiguration {
            node: NodeConfiguration {
                platform_version: "1.2.0".to_string(),
                ..NodeConfiguration::default()
            },
            ..ControlPlaneConfiguration::default()
        };
        let manifest = api_server_manifest(&cfg);
        assert_eq!(manifest.labels[COMPONENT_LABEL], API_SERVER_COMPONENT);
        assert!(manifest
            .command
            .iter()
            .any(|arg| arg == "--client-ca-file=/etc/ember/pki/ca.crt"));
    }

    #[test]
    fn test_write_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ControlPlaneConfiguration::default();
        write_manifest(dir.path(), &scheduler_manifest(&cfg)).unwrap();
        let data = std::fs::read_to_string(dir.path().join("ember-scheduler.json")).unwrap();
        assert!(data.contains("ember-scheduler"));
    }
}
