//! Optional capability gates.
//!
//! Gates are declared with defaults here and merged with user overrides
//! exactly once, producing an immutable [`Features`] value that is threaded
//! through the orchestrator into each stage. Stages never consult global
//! state.

use std::collections::HashMap;

use crate::error::ConfigError;

/// Gate name for the handshake authorization server manifest.
pub const HANDSHAKE_SERVER: &str = "HandshakeServer";

/// Gate name for publishing the auxiliary trust CA.
pub const AUX_TRUST_CA: &str = "AuxTrustCA";

/// Gate name for publishing shared-store client secrets.
pub const PUBLISH_STORE_SECRETS: &str = "PublishStoreSecrets";

/// The resolved, immutable feature set for a single bootstrap run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// Write the handshake authorization server manifest on control-plane
    /// nodes.
    pub handshake_server: bool,

    /// Publish the auxiliary trust CA after the cluster is available.
    pub aux_trust_ca: bool,

    /// Publish shared-store client credentials after the cluster is
    /// available.
    pub publish_store_secrets: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            handshake_server: false,
            aux_trust_ca: false,
            publish_store_secrets: true,
        }
    }
}

impl Features {
    /// Merge declared defaults with user overrides. Unknown gate names are
    /// rejected rather than ignored.
    pub fn resolve(overrides: &HashMap<String, bool>) -> Result<Self, ConfigError> {
        let mut features = Features::default();
        for (name, enabled) in overrides {
            match name.as_str() {
                HANDSHAKE_SERVER => features.handshake_server = *enabled,
                AUX_TRUST_CA => features.aux_trust_ca = *enabled,
                PUBLISH_STORE_SECRETS => features.publish_store_secrets = *enabled,
                _ => return Err(ConfigError::UnknownFeatureGate(name.clone())),
            }
        }
        Ok(features)
    }
}
