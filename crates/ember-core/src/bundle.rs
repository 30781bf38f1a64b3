//! Credential bundles.
//!
//! A credential bundle is the self-contained artifact a node or operator
//! uses to talk to the cluster: the API endpoint, the cluster CA, and
//! either a bearer token or a client certificate.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::token::BootstrapTokenString;

/// How the bundle's user authenticates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthInfo {
    /// Bearer bootstrap token.
    Token { token: BootstrapTokenString },

    /// Client certificate and key, both base64 PEM.
    ClientCertificate { cert_data: String, key_data: String },
}

/// A self-contained credential bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialBundle {
    /// API server URL, e.g. `https://10.0.0.5:6443`.
    pub server: String,

    /// Cluster name.
    pub cluster: String,

    /// Identity name the credentials belong to.
    pub user: String,

    /// Cluster CA certificate, base64 PEM.
    pub ca_data: String,

    pub auth: AuthInfo,
}

impl CredentialBundle {
    /// Build a token-bearing bundle.
    pub fn with_token(
        server: impl Into<String>,
        cluster: impl Into<String>,
        user: impl Into<String>,
        ca_pem: &[u8],
        token: BootstrapTokenString,
    ) -> Self {
        Self {
            server: server.into(),
            cluster: cluster.into(),
            user: user.into(),
            ca_data: BASE64.encode(ca_pem),
            auth: AuthInfo::Token { token },
        }
    }

    /// Build a client-certificate bundle.
    pub fn with_client_certificate(
        server: impl Into<String>,
        cluster: impl Into<String>,
        user: impl Into<String>,
        ca_pem: &[u8],
        cert_pem: &[u8],
        key_pem: &[u8],
    ) -> Self {
        Self {
            server: server.into(),
            cluster: cluster.into(),
            user: user.into(),
            ca_data: BASE64.encode(ca_pem),
            auth: AuthInfo::ClientCertificate {
                cert_data: BASE64.encode(cert_pem),
                key_data: BASE64.encode(key_pem),
            },
        }
    }

    /// The decoded cluster CA certificate PEM.
    pub fn ca_pem(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.ca_data)
    }

    /// Write the bundle as JSON with mode 0600.
    pub fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
    }

    /// Load a bundle from a JSON file.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let token: BootstrapTokenString = "abcdef.0123456789abcdef".parse().unwrap();
        let bundle = CredentialBundle::with_token(
            "https://10.0.0.5:6443",
            "ember",
            "tls-bootstrap-token-user",
            b"-----BEGIN CERTIFICATE-----\n",
            token,
        );
        let json = serde_json::to_string(&bundle).unwrap();
        let back: CredentialBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bundle);
        assert_eq!(back.ca_pem().unwrap(), b"-----BEGIN CERTIFICATE-----\n");
    }
}
