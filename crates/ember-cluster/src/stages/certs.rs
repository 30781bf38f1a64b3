//! Cluster and node certificate stages.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use ember_core::constants::DEFAULT_CLUSTER_NAME;
use ember_core::{net, ControlPlaneConfiguration};
use ember_pki::{AltNames, CertificateAuthority, CertificateConfig, ExtendedUsage};

use crate::engine::Engine;
use crate::store::ClusterFile;
use crate::ClusterError;

/// Files that must be identical on every control-plane node. Everything
/// else is derived from these.
const SHARED_CLUSTER_FILES: &[&str] = &[
    "ca.crt",
    "ca.key",
    "front-proxy-ca.crt",
    "front-proxy-ca.key",
    "auth-proxy-ca.crt",
    "auth-proxy-ca.key",
    "sa.key",
    "sa.pub",
];

/// Download the shared cluster certificates, or generate and publish them
/// when this is the first control-plane node.
///
/// The store insert is transactional and first-writer-wins: losing the
/// race means another node committed first, so the local generation is
/// discarded in favor of a re-read.
pub async fn create_or_download(
    engine: &Engine,
    cfg: &ControlPlaneConfiguration,
) -> Result<(), ClusterError> {
    let files = engine.store.load_all().await?;
    if !files.is_empty() {
        info!("existing cluster pki found");
        for file in &files {
            file.write()?;
        }
        return Ok(());
    }

    // First node: the certs do not exist yet and must be created. This
    // happens at most once for any given cluster.
    info!("cluster pki not found in store, generating new pki locally");
    let pki_dir = cfg.node.pki_dir();
    write_cluster_ca(&pki_dir)?;
    write_front_proxy_ca(&pki_dir)?;
    write_auth_proxy_ca(&pki_dir)?;
    write_service_account_key(&pki_dir)?;

    let mut records = Vec::new();
    for path in shared_cluster_file_paths(&pki_dir) {
        records.push(ClusterFile::from_path(&path)?);
    }
    match engine.store.insert_all(records).await {
        Ok(()) => Ok(()),
        Err(ClusterError::StoreConflict) => {
            info!("another node created the cluster pki first, downloading");
            for file in engine.store.load_all().await? {
                file.write()?;
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Generate the certificates specific to this node. Runs after the shared
/// cluster certs exist locally.
pub async fn create_node_certs(
    _engine: &Engine,
    cfg: &ControlPlaneConfiguration,
) -> Result<(), ClusterError> {
    write_api_server_cert(cfg)?;
    write_api_server_agent_client_cert(cfg)?;
    write_front_proxy_client_cert(cfg)?;
    write_healthcheck_client_cert(cfg)?;
    Ok(())
}

fn write_cluster_ca(dir: &Path) -> Result<(), ClusterError> {
    if exists(&dir.join("ca.key")) {
        warn!("cluster CA already exists");
        return Ok(());
    }
    let ca = CertificateAuthority::new(
        "ca",
        &CertificateConfig {
            common_name: DEFAULT_CLUSTER_NAME.to_string(),
            ..CertificateConfig::default()
        },
    )?;
    ca.write_files(dir)?;
    Ok(())
}

fn write_front_proxy_ca(dir: &Path) -> Result<(), ClusterError> {
    if exists(&dir.join("front-proxy-ca.key")) {
        warn!("front proxy CA already exists");
        return Ok(());
    }
    let ca = CertificateAuthority::new(
        "front-proxy-ca",
        &CertificateConfig {
            common_name: "front-proxy-ca".to_string(),
            ..CertificateConfig::default()
        },
    )?;
    ca.write_files(dir)?;
    Ok(())
}

/// The auth-proxy CA is generated ahead of need: the application that will
/// use it ultimately runs on the same cluster it helps authenticate, so it
/// cannot be created after bootstrap.
fn write_auth_proxy_ca(dir: &Path) -> Result<(), ClusterError> {
    if exists(&dir.join("auth-proxy-ca.key")) {
        warn!("auth proxy CA already exists");
        return Ok(());
    }
    let ca = CertificateAuthority::new(
        "auth-proxy-ca",
        &CertificateConfig {
            common_name: "auth-proxy-ca".to_string(),
            ..CertificateConfig::default()
        },
    )?;
    ca.write_files(dir)?;
    Ok(())
}

fn write_service_account_key(dir: &Path) -> Result<(), ClusterError> {
    if exists(&dir.join("sa.key")) {
        warn!("service account key already exists");
        return Ok(());
    }
    ember_pki::write_service_account_key(dir, "sa")?;
    Ok(())
}

fn write_api_server_cert(cfg: &ControlPlaneConfiguration) -> Result<(), ClusterError> {
    let dir = cfg.node.pki_dir();
    if exists(&dir.join("apiserver.key")) {
        warn!("apiserver cert/key already exists");
        return Ok(());
    }

    let mut alt_names = AltNames {
        dns_names: vec![
            cfg.node.hostname.clone(),
            DEFAULT_CLUSTER_NAME.to_string(),
            format!("{DEFAULT_CLUSTER_NAME}.default"),
            format!("{DEFAULT_CLUSTER_NAME}.default.svc"),
            "localhost".to_string(),
        ],
        ips: vec![IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)],
    };
    match net::service_api_ip(&cfg.service_subnet) {
        Some(ip) => alt_names.ips.push(IpAddr::V4(ip)),
        None => {
            return Err(ember_core::ConfigError::from_messages(vec![format!(
                "unable to derive the API service IP from service_subnet {:?}",
                cfg.service_subnet
            )])
            .into())
        }
    }
    if let Ok(ip) = cfg.node.host_ipv4.parse::<IpAddr>() {
        alt_names.ips.push(ip);
    }
    add_san(&mut alt_names, &cfg.control_plane_endpoint.host);
    for san in &cfg.extra_sans {
        add_san(&mut alt_names, san);
    }

    let ca = ember_pki::load_certificate_authority(&dir, "ca")?;
    let kp = ca.new_signed_key_pair(
        "apiserver",
        &CertificateConfig {
            common_name: "ember-apiserver".to_string(),
            alt_names,
            usages: vec![ExtendedUsage::ServerAuth],
            ..CertificateConfig::default()
        },
    )?;
    kp.write_files(&dir)?;
    Ok(())
}

fn write_api_server_agent_client_cert(cfg: &ControlPlaneConfiguration) -> Result<(), ClusterError> {
    let dir = cfg.node.pki_dir();
    if exists(&dir.join("apiserver-agent-client.key")) {
        warn!("apiserver-agent-client cert/key already exists");
        return Ok(());
    }
    let ca = ember_pki::load_certificate_authority(&dir, "ca")?;
    let kp = ca.new_signed_key_pair(
        "apiserver-agent-client",
        &CertificateConfig {
            common_name: "ember-apiserver-agent-client".to_string(),
            organization: vec!["system:masters".to_string()],
            usages: vec![ExtendedUsage::ClientAuth],
            ..CertificateConfig::default()
        },
    )?;
    kp.write_files(&dir)?;
    Ok(())
}

fn write_front_proxy_client_cert(cfg: &ControlPlaneConfiguration) -> Result<(), ClusterError> {
    let dir = cfg.node.pki_dir();
    if exists(&dir.join("front-proxy-client.key")) {
        warn!("front-proxy-client cert/key already exists");
        return Ok(());
    }
    let ca = ember_pki::load_certificate_authority(&dir, "front-proxy-ca")?;
    let kp = ca.new_signed_key_pair(
        "front-proxy-client",
        &CertificateConfig {
            common_name: "front-proxy-client".to_string(),
            usages: vec![ExtendedUsage::ClientAuth],
            ..CertificateConfig::default()
        },
    )?;
    kp.write_files(&dir)?;
    Ok(())
}

fn write_healthcheck_client_cert(cfg: &ControlPlaneConfiguration) -> Result<(), ClusterError> {
    let dir = cfg.node.pki_dir();
    if exists(&dir.join("apiserver-healthcheck-client.key")) {
        warn!("apiserver-healthcheck-client cert/key already exists");
        return Ok(());
    }
    let ca = ember_pki::load_certificate_authority(&dir, "ca")?;
    let kp = ca.new_signed_key_pair(
        "apiserver-healthcheck-client",
        &CertificateConfig {
            common_name: "system:basic-info-viewer".to_string(),
            usages: vec![ExtendedUsage::ClientAuth],
            ..CertificateConfig::default()
        },
    )?;
    kp.write_files(&dir)?;
    Ok(())
}

fn add_san(alt_names: &mut AltNames, san: &str) {
    if san.is_empty() {
        return;
    }
    if let Ok(ip) = san.parse::<IpAddr>() {
        alt_names.ips.push(ip);
        return;
    }
    if is_dns_name(san) {
        alt_names.dns_names.push(san.to_string());
        return;
    }
    warn!(
        san,
        "not added to the apiserver certificate: neither a valid IP nor a DNS-1123 name"
    );
}

fn is_dns_name(s: &str) -> bool {
    let s = s.strip_prefix("*.").unwrap_or(s);
    !s.is_empty()
        && s.len() <= 253
        && s.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}

fn exists(path: &Path) -> bool {
    path.exists()
}

/// The on-disk paths of the shared cluster files under a PKI directory.
pub fn shared_cluster_file_paths(pki_dir: &Path) -> Vec<PathBuf> {
    SHARED_CLUSTER_FILES
        .iter()
        .map(|name| pki_dir.join(name))
        .collect()
}
