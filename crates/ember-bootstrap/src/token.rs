//! Bootstrap token minting and persistence.
//!
//! Minted tokens are persisted as cluster-visible credential records via an
//! idempotent create-or-update so that restarting the authorization server
//! or racing requests never fail on an existing record. Two expiration
//! policies coexist: handshake-minted tokens live 15 minutes, manually
//! minted ones 10 years. Neither is single-use.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use ember_core::constants::TOKEN_EXTRA_GROUPS;
use ember_core::BootstrapTokenString;

use crate::BootstrapError;

/// Timestamp format of the `expiration` field.
pub const EXPIRATION_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A cluster-visible bootstrap token credential record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    /// Record name, `bootstrap-token-<id>`.
    pub name: String,

    pub data: BTreeMap<String, String>,
}

/// Persistence seam for token records. The production implementation is the
/// platform's management API; tests use [`MemoryTokenStore`].
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Create the record, or update it when it already exists.
    async fn upsert(&self, record: TokenRecord) -> Result<(), BootstrapError>;
}

/// Generate a bootstrap token and persist its record with the given
/// time-to-live.
pub async fn create_bootstrap_token(
    store: &dyn TokenStore,
    ttl: Duration,
) -> Result<BootstrapTokenString, BootstrapError> {
    let (id, secret) = ember_pki::generate_bootstrap_token();
    let token = BootstrapTokenString::new(id, secret)?;
    let expiration = Utc::now()
        + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(15));

    let mut data = BTreeMap::new();
    data.insert("token-id".to_string(), token.id().to_string());
    data.insert("token-secret".to_string(), token.secret().to_string());
    data.insert(
        "usage-bootstrap-authentication".to_string(),
        "true".to_string(),
    );
    data.insert("usage-bootstrap-signing".to_string(), "true".to_string());
    data.insert(
        "auth-extra-groups".to_string(),
        TOKEN_EXTRA_GROUPS.to_string(),
    );
    data.insert(
        "expiration".to_string(),
        expiration.format(EXPIRATION_FORMAT).to_string(),
    );

    store
        .upsert(TokenRecord {
            name: format!("bootstrap-token-{}", token.id()),
            data,
        })
        .await?;
    info!(token_id = token.id(), "bootstrap token created");
    Ok(token)
}

/// In-memory token store.
#[derive(Default)]
pub struct MemoryTokenStore {
    records: std::sync::Mutex<BTreeMap<String, TokenRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored records.
    pub fn records(&self) -> Vec<TokenRecord> {
        self.records
            .lock()
            .expect("token store lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn upsert(&self, record: TokenRecord) -> Result<(), BootstrapError> {
        self.records
            .lock()
            .expect("token store lock poisoned")
            .insert(record.name.clone(), record);
        Ok(())
    }
}
