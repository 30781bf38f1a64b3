//! Instance metadata service client.

use std::time::Duration;

use crate::types::SignedDocument;
use crate::BootstrapError;

/// Default metadata service base URL for dynamic instance data.
pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254/latest/dynamic";

/// Client for the instance metadata service exposed to every cloud
/// instance on a link-local address.
pub struct MetadataClient {
    client: reqwest::Client,
    base_url: String,
}

impl MetadataClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BootstrapError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(BootstrapError::Client)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Fetch the instance identity document and its signature.
    pub async fn signed_document(&self) -> Result<SignedDocument, BootstrapError> {
        let document = self.dynamic_data("instance-identity/document").await?;
        let signature = self.dynamic_data("instance-identity/signature").await?;
        Ok(SignedDocument {
            document,
            signature,
        })
    }

    async fn dynamic_data(&self, path: &str) -> Result<String, BootstrapError> {
        self.client
            .get(format!("{}/{}", self.base_url, path))
            .send()
            .await
            .map_err(BootstrapError::Metadata)?
            .error_for_status()
            .map_err(BootstrapError::Metadata)?
            .text()
            .await
            .map_err(BootstrapError::Metadata)
    }
}
