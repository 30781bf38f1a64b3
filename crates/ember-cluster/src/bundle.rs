//! Credential bundle construction and maintenance.
//!
//! Control-plane components authenticate with client certificates signed by
//! the cluster CA; their bundles are written during bootstrap. Operator
//! workstations merge bundles for many clusters into one file, guarded by a
//! lockfile.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use ember_core::bundle::AuthInfo;
use ember_core::constants::DEFAULT_CLUSTER_NAME;
use ember_core::ControlPlaneConfiguration;
use ember_core::CredentialBundle;
use ember_pki::{CertificateAuthority, CertificateConfig, ExtendedUsage};

use crate::util::lockfile::Lock;
use crate::ClusterError;

/// The client-certificate identities written on a control-plane node,
/// `(file stem, common name, organizations)`.
const CONTROL_PLANE_IDENTITIES: &[(&str, &str, &[&str])] = &[
    ("admin", "ember-admin", &["system:masters"]),
    ("controller-manager", "system:ember-controller-manager", &[]),
    ("scheduler", "system:ember-scheduler", &[]),
];

/// Build a client-certificate bundle for one identity.
pub fn client_bundle(
    ca: &CertificateAuthority,
    server: &str,
    user: &str,
    organization: &[&str],
) -> Result<CredentialBundle, ClusterError> {
    let kp = ca.new_signed_key_pair(
        user,
        &CertificateConfig {
            common_name: user.to_string(),
            organization: organization.iter().map(|s| s.to_string()).collect(),
            usages: vec![ExtendedUsage::ClientAuth],
            ..CertificateConfig::default()
        },
    )?;
    Ok(CredentialBundle::with_client_certificate(
        server,
        DEFAULT_CLUSTER_NAME,
        user,
        ca.cert_pem().as_bytes(),
        kp.cert_pem.as_bytes(),
        kp.key_pem.as_bytes(),
    ))
}

/// Write the control-plane credential bundles (`admin.conf`,
/// `controller-manager.conf`, `scheduler.conf`, and the node agent's
/// `agent.conf`) under the cluster directory.
pub fn write_control_plane_bundles(cfg: &ControlPlaneConfiguration) -> Result<(), ClusterError> {
    let ca = ember_pki::load_certificate_authority(&cfg.node.pki_dir(), "ca")?;
    let server = format!("https://{}", cfg.control_plane_endpoint);

    for (stem, common_name, organization) in CONTROL_PLANE_IDENTITIES {
        let bundle = client_bundle(&ca, &server, common_name, organization)?;
        bundle.write_to_file(&cfg.node.cluster_dir.join(format!("{stem}.conf")))?;
    }

    // The node agent's identity is bound to the hostname.
    let agent_user = format!("system:node:{}", cfg.node.hostname);
    let agent = client_bundle(&ca, &server, &agent_user, &["system:nodes"])?;
    agent.write_to_file(&cfg.node.cluster_dir.join("agent.conf"))?;
    Ok(())
}

/// Re-sign the client certificate inside an existing bundle file,
/// preserving its subject and usages. Used by certificate renewal.
pub fn renew_bundle(
    path: &Path,
    ca: &CertificateAuthority,
    dry_run: bool,
) -> Result<CredentialBundle, ClusterError> {
    let mut bundle = CredentialBundle::load(path)?;
    let AuthInfo::ClientCertificate { cert_data, .. } = &bundle.auth else {
        return Err(ClusterError::Pki(ember_pki::PkiError::ParseCert(format!(
            "bundle {} does not carry a client certificate",
            path.display()
        ))));
    };

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    let cert_pem = BASE64
        .decode(cert_data)
        .map_err(|e| ClusterError::Pki(ember_pki::PkiError::ParseCert(e.to_string())))?;
    let cert_pem = String::from_utf8(cert_pem)
        .map_err(|e| ClusterError::Pki(ember_pki::PkiError::ParseCert(e.to_string())))?;

    let config = ember_pki::renew::config_from_cert_pem(&cert_pem)?;
    let kp = ca.new_signed_key_pair(&bundle.user, &config)?;
    bundle.auth = AuthInfo::ClientCertificate {
        cert_data: BASE64.encode(kp.cert_pem.as_bytes()),
        key_data: BASE64.encode(kp.key_pem.as_bytes()),
    };
    if dry_run {
        info!(path = %path.display(), "dry run, not writing renewed bundle");
        return Ok(bundle);
    }
    bundle.write_to_file(path)?;
    Ok(bundle)
}

/// A file collecting bundles for several clusters, keyed by cluster name.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BundleSet {
    pub clusters: BTreeMap<String, CredentialBundle>,
}

/// Merge `bundle` into the bundle-set file at `path` under its cluster
/// name. The read-modify-write is serialized against concurrent editors
/// with an adjacent lockfile.
pub async fn merge_into_file(path: &Path, bundle: &CredentialBundle) -> Result<(), ClusterError> {
    let lock = Lock::new(path.with_extension("lock"));
    let _guard = lock.lock(Duration::from_secs(30)).await?;

    let mut set = if path.exists() {
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data)?
    } else {
        BundleSet::default()
    };
    set.clusters.insert(bundle.cluster.clone(), bundle.clone());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(&set)?)?;
    Ok(())
}
