//! Node bootstrap configuration.
//!
//! Three configuration types exist, one per role: [`NodeConfiguration`] is
//! embedded in both [`ControlPlaneConfiguration`] and
//! [`WorkerConfiguration`]. Runtime defaulting fills in values that can only
//! be known on the host (addresses, hostname); validation collects every
//! problem into a single multi-error summary before any external call is
//! made.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants;
use crate::error::ConfigError;
use crate::net;
use crate::token::BootstrapTokenString;

/// A host/port pair identifying the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn is_zero(&self) -> bool {
        self.host.is_empty() && self.port == 0
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Configuration common to every node role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfiguration {
    /// Node hostname. Detected from the OS when empty.
    pub hostname: String,

    /// Primary IPv4 address. Detected from the routing table when empty.
    pub host_ipv4: String,

    /// Directory holding cluster state, PKI material, and manifests.
    pub cluster_dir: PathBuf,

    /// Container runtime socket consumed by the node agent.
    pub runtime_socket: String,

    /// Init-system unit name of the node agent.
    pub agent_service: String,

    /// Version of the platform being provisioned.
    pub platform_version: String,
}

impl Default for NodeConfiguration {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            host_ipv4: String::new(),
            cluster_dir: PathBuf::from(constants::DEFAULT_CLUSTER_DIR),
            runtime_socket: "unix:///run/containerd/containerd.sock".to_string(),
            agent_service: constants::DEFAULT_AGENT_SERVICE.to_string(),
            platform_version: String::new(),
        }
    }
}

impl NodeConfiguration {
    /// Directory holding PKI material for this node.
    pub fn pki_dir(&self) -> PathBuf {
        self.cluster_dir.join("pki")
    }

    /// Directory holding managed component manifests.
    pub fn manifest_dir(&self) -> PathBuf {
        self.cluster_dir.join("manifests")
    }

    pub(crate) fn apply_runtime_defaults(&mut self) {
        if self.host_ipv4.is_empty() {
            if let Some(ip) = net::detect_host_ipv4() {
                self.host_ipv4 = ip.to_string();
            }
        }
        if self.hostname.is_empty() {
            self.hostname = hostname();
        }
    }

    pub(crate) fn validate(&self) -> Vec<String> {
        let mut errs = Vec::new();
        match semver::Version::parse(&self.platform_version) {
            Err(_) => errs.push(format!(
                "invalid platform_version: {:?}",
                self.platform_version
            )),
            Ok(v) => {
                let min = semver::Version::new(1, 0, 0);
                let max = semver::Version::new(1, 3, 0);
                if v < min {
                    errs.push(format!(
                        "platform_version {:?} is older than the minimum supported {}",
                        self.platform_version,
                        constants::MIN_PLATFORM_VERSION
                    ));
                }
                if v > max {
                    warn!(
                        platform_version = %self.platform_version,
                        "platform_version is newer than expected; bootstrapping may produce undesired behavior"
                    );
                }
            }
        }
        errs
    }
}

/// Connection settings for the replicated store holding shared cluster
/// files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedStoreConfiguration {
    pub endpoints: Vec<String>,
    pub ca_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,

    /// The store CA private key. When present, shared cluster files are
    /// encrypted at rest with a digest of this key.
    pub ca_key: PathBuf,
}

impl SharedStoreConfiguration {
    pub fn client_addr(&self) -> &str {
        self.endpoints.first().map(String::as_str).unwrap_or("")
    }
}

/// Configuration surface of the handshake authorization server, used when
/// the handshake-server capability is enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfiguration {
    /// Identity provider offered to joining nodes.
    pub provider: String,

    /// Allow-list filters applied in key order.
    pub filters: std::collections::BTreeMap<String, String>,

    /// PEM file carrying the provider's document-signing public key.
    pub provider_key: PathBuf,

    /// Base URL of the cloud instance-description API.
    pub instance_api: String,
}

/// Configuration for bootstrapping a control-plane node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfiguration {
    pub node: NodeConfiguration,
    pub control_plane_endpoint: Endpoint,
    pub service_subnet: String,
    pub pod_subnet: String,
    pub store: SharedStoreConfiguration,

    /// Additional subject alternative names for the API server serving
    /// certificate.
    pub extra_sans: Vec<String>,

    /// User feature-gate overrides, resolved once at invocation time.
    pub feature_gates: HashMap<String, bool>,

    pub api_bind_port: u16,

    pub handshake: HandshakeConfiguration,
}

impl ControlPlaneConfiguration {
    /// Fill in host-derived values and derived defaults. Must run before
    /// validation.
    pub fn apply_runtime_defaults(&mut self) {
        self.node.apply_runtime_defaults();

        if self.api_bind_port == 0 {
            self.api_bind_port = constants::DEFAULT_API_SERVER_PORT;
        }
        if self.service_subnet.is_empty() {
            self.service_subnet = "10.254.0.0/16".to_string();
        }
        if self.pod_subnet.is_empty() {
            self.pod_subnet = "10.253.0.0/16".to_string();
        }
        if self.control_plane_endpoint.host.is_empty() {
            warn!(
                "control_plane_endpoint is being set implicitly to the host IPv4; a load balancer \
                 or DNS name is recommended so cluster services can always reach the control plane"
            );
            self.control_plane_endpoint.host = self.node.host_ipv4.clone();
        }
        if self.control_plane_endpoint.port == 0 {
            self.control_plane_endpoint.port = self.api_bind_port;
        }
        if self.store.endpoints.is_empty() {
            self.store.endpoints.push(format!(
                "https://{}:{}",
                self.control_plane_endpoint.host,
                constants::DEFAULT_STORE_PORT
            ));
        }
        if self.handshake.provider.is_empty() {
            self.handshake.provider = "cloud-identity".to_string();
        }
        if self.handshake.provider_key.as_os_str().is_empty() {
            self.handshake.provider_key = self.node.pki_dir().join("authd-provider-key.pem");
        }
        if self.store.endpoints[0].starts_with("https://") {
            let store_pki = self.node.pki_dir().join("store");
            if self.store.ca_file.as_os_str().is_empty() {
                self.store.ca_file = store_pki.join("ca.crt");
            }
            if self.store.cert_file.as_os_str().is_empty() {
                self.store.cert_file = store_pki.join("client.crt");
            }
            if self.store.key_file.as_os_str().is_empty() {
                self.store.key_file = store_pki.join("client.key");
            }
            if self.store.ca_key.as_os_str().is_empty() {
                self.store.ca_key = store_pki.join("ca.key");
            }
        }
    }

    /// Validate the configuration, collecting every failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errs = self.node.validate();

        for ep in &self.store.endpoints {
            if !ep.starts_with("http") {
                errs.push(format!(
                    "must specify scheme (http, https) for store endpoint: {:?}",
                    ep
                ));
                continue;
            }
            if ep.strip_prefix("http://").unwrap_or("").is_empty()
                && ep.strip_prefix("https://").unwrap_or("").is_empty()
            {
                errs.push(format!("invalid store endpoint url: {:?}", ep));
            }
        }
        if net::parse_ipv4_cidr(&self.service_subnet).is_none() {
            errs.push(format!("invalid service_subnet: {:?}", self.service_subnet));
        }
        if net::parse_ipv4_cidr(&self.pod_subnet).is_none() {
            errs.push(format!("invalid pod_subnet: {:?}", self.pod_subnet));
        }
        if errs.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::from_messages(errs))
        }
    }
}

/// Configuration for joining a worker node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfiguration {
    pub node: NodeConfiguration,
    pub control_plane_endpoint: Endpoint,

    /// Pre-shared join credential. When present, no handshake is performed.
    pub bootstrap_token: Option<BootstrapTokenString>,

    /// Handshake authorization server URL. Defaults from the control plane
    /// endpoint host.
    pub bootstrap_server_url: String,

    /// Path of the cluster CA certificate used to validate the handshake
    /// channel and embedded in the credential bundle.
    pub ca_cert: PathBuf,
}

impl WorkerConfiguration {
    /// Fill in host-derived values and derived defaults. Must run before
    /// validation.
    pub fn apply_runtime_defaults(&mut self) {
        self.node.apply_runtime_defaults();

        if self.bootstrap_server_url.is_empty() && !self.control_plane_endpoint.host.is_empty() {
            self.bootstrap_server_url = format!(
                "https://{}:{}",
                self.control_plane_endpoint.host,
                constants::DEFAULT_AUTHD_PORT
            );
        }
        if self.control_plane_endpoint.port == 0 {
            self.control_plane_endpoint.port = constants::DEFAULT_API_SERVER_PORT;
            warn!(
                control_plane_endpoint = %self.control_plane_endpoint,
                "control_plane_endpoint provided without port, defaulting to {}",
                constants::DEFAULT_API_SERVER_PORT
            );
        }
        if self.ca_cert.as_os_str().is_empty() {
            self.ca_cert = self.node.pki_dir().join("ca.crt");
        }
    }

    /// Validate the configuration, collecting every failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errs = self.node.validate();

        if self.control_plane_endpoint.is_zero() {
            errs.push("must provide control_plane_endpoint for a worker".to_string());
        }
        if self.bootstrap_server_url.is_empty() && self.bootstrap_token.is_none() {
            errs.push(
                "must provide either bootstrap_server_url or bootstrap_token for a worker"
                    .to_string(),
            );
        }
        if errs.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::from_messages(errs))
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| {
        std::fs::read_to_string("/etc/hostname")
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    })
}
