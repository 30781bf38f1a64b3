//! Handshake wire entities.

use serde::{Deserialize, Serialize};

/// Identity verification strategy offered by the authorization server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationType {
    /// Cloud-provider signed instance identity document.
    CloudIdentity,
    Unknown,
}

impl AuthorizationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationType::CloudIdentity => "cloud-identity",
            AuthorizationType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for AuthorizationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AuthorizationType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AuthorizationType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "cloud-identity" => AuthorizationType::CloudIdentity,
            _ => AuthorizationType::Unknown,
        })
    }
}

/// A tagged authorization request: the provider type selects how `body` is
/// interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    #[serde(rename = "type")]
    pub auth_type: AuthorizationType,
    pub body: serde_json::Value,
}

/// Authorization server reply: either a bootstrap token or an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(
        rename = "bootstrapToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub bootstrap_token: Option<String>,
}

/// An externally issued, signed attestation of a node's cloud identity.
/// Immutable once fetched; consumed exactly once per handshake attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedDocument {
    /// The raw identity document text exactly as served by the metadata
    /// service. The signature covers these bytes.
    pub document: String,

    /// Base64 signature over `document`.
    pub signature: String,
}

/// The inner identity document describing a running instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IdentityDocument {
    pub availability_zone: String,
    pub region: String,
    pub instance_id: String,
    pub account_id: String,
    pub private_ip: String,
    pub architecture: String,
    pub instance_type: String,
    pub image_id: String,
}

impl IdentityDocument {
    /// Logical name of the instance described by this document.
    pub fn name(&self) -> String {
        format!("{}-{}", self.account_id, self.instance_id)
    }
}
