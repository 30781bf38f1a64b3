//! Platform management API seam.
//!
//! The orchestrated platform's management API is an external collaborator:
//! stages only need generic create-or-update of secrets, config records,
//! and manifests, plus node label/taint patching. [`RestPlatformClient`] is
//! a thin adapter over that REST surface; [`MemoryPlatform`] backs tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use ember_bootstrap::{TokenRecord, TokenStore};
use ember_core::bundle::AuthInfo;
use ember_core::CredentialBundle;

use crate::ClusterError;

/// A node taint: pods without a matching toleration are excluded per
/// `effect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Taint {
    pub key: String,
    pub effect: String,
}

/// Generic create-or-update surface of the platform management API.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn upsert_secret(
        &self,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), ClusterError>;

    async fn upsert_config(
        &self,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), ClusterError>;

    async fn apply_manifest(&self, manifest: &serde_json::Value) -> Result<(), ClusterError>;

    async fn patch_node(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        taints: Vec<Taint>,
    ) -> Result<(), ClusterError>;
}

/// REST adapter: create, and update on conflict.
pub struct RestPlatformClient {
    client: reqwest::Client,
    base_url: String,
    bearer: Option<String>,
}

impl RestPlatformClient {
    /// Build a client from a credential bundle: the bundle's CA pins the
    /// TLS channel and its auth material authenticates the calls.
    pub fn from_bundle(bundle: &CredentialBundle) -> Result<Self, ClusterError> {
        let mut builder = reqwest::Client::builder().timeout(std::time::Duration::from_secs(10));
        let ca = bundle
            .ca_pem()
            .map_err(|e| ClusterError::Platform(e.to_string()))?;
        builder = builder.add_root_certificate(
            reqwest::Certificate::from_pem(&ca)
                .map_err(|e| ClusterError::Platform(e.to_string()))?,
        );
        let mut bearer = None;
        match &bundle.auth {
            AuthInfo::Token { token } => bearer = Some(token.to_string()),
            AuthInfo::ClientCertificate {
                cert_data,
                key_data,
            } => {
                use base64::engine::general_purpose::STANDARD as BASE64;
                use base64::Engine;
                let mut identity = BASE64
                    .decode(cert_data)
                    .map_err(|e| ClusterError::Platform(e.to_string()))?;
                identity.extend(
                    BASE64
                        .decode(key_data)
                        .map_err(|e| ClusterError::Platform(e.to_string()))?,
                );
                builder = builder.identity(
                    reqwest::Identity::from_pem(&identity)
                        .map_err(|e| ClusterError::Platform(e.to_string()))?,
                );
            }
        }
        Ok(Self {
            client: builder
                .build()
                .map_err(|e| ClusterError::Platform(e.to_string()))?,
            base_url: bundle.server.trim_end_matches('/').to_string(),
            bearer,
        })
    }

    async fn create_or_update(
        &self,
        collection: &str,
        name: &str,
        body: &serde_json::Value,
    ) -> Result<(), ClusterError> {
        let create = self.request(
            reqwest::Method::POST,
            &format!("{}/{}", self.base_url, collection),
            body,
        );
        let resp = create.send().await.map_err(|e| ClusterError::Platform(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::CONFLICT {
            let update = self.request(
                reqwest::Method::PUT,
                &format!("{}/{}/{}", self.base_url, collection, name),
                body,
            );
            let resp = update
                .send()
                .await
                .map_err(|e| ClusterError::Platform(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ClusterError::Platform(format!(
                    "update of {collection}/{name} returned {}",
                    resp.status()
                )));
            }
            return Ok(());
        }
        if !resp.status().is_success() {
            return Err(ClusterError::Platform(format!(
                "create of {collection}/{name} returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        body: &serde_json::Value,
    ) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url).json(body);
        if let Some(bearer) = &self.bearer {
            req = req.bearer_auth(bearer);
        }
        req
    }
}

#[async_trait]
impl PlatformClient for RestPlatformClient {
    async fn upsert_secret(
        &self,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        self.create_or_update(
            "api/v1/secrets",
            name,
            &serde_json::json!({ "name": name, "data": data }),
        )
        .await
    }

    async fn upsert_config(
        &self,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        self.create_or_update(
            "api/v1/configs",
            name,
            &serde_json::json!({ "name": name, "data": data }),
        )
        .await
    }

    async fn apply_manifest(&self, manifest: &serde_json::Value) -> Result<(), ClusterError> {
        let name = manifest
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("unnamed");
        self.create_or_update("api/v1/manifests", name, manifest).await
    }

    async fn patch_node(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        taints: Vec<Taint>,
    ) -> Result<(), ClusterError> {
        let url = format!("{}/api/v1/nodes/{}", self.base_url, name);
        let body = serde_json::json!({ "labels": labels, "taints": taints });
        let resp = self
            .request(reqwest::Method::PATCH, &url, &body)
            .send()
            .await
            .map_err(|e| ClusterError::Platform(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ClusterError::Platform(format!(
                "patch of node {name} returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for RestPlatformClient {
    async fn upsert(&self, record: TokenRecord) -> Result<(), ember_bootstrap::BootstrapError> {
        self.upsert_secret(&record.name, record.data)
            .await
            .map_err(|e| ember_bootstrap::BootstrapError::TokenStore(e.to_string()))
    }
}

/// Platform client that loads its credential bundle from disk on every
/// call. During bootstrap the admin bundle does not exist until the
/// credentials stage has run, so the client cannot be built up front.
pub struct LazyPlatformClient {
    path: std::path::PathBuf,
}

impl LazyPlatformClient {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn client(&self) -> Result<RestPlatformClient, ClusterError> {
        let bundle = CredentialBundle::load(&self.path)?;
        RestPlatformClient::from_bundle(&bundle)
    }
}

#[async_trait]
impl PlatformClient for LazyPlatformClient {
    async fn upsert_secret(
        &self,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        self.client()?.upsert_secret(name, data).await
    }

    async fn upsert_config(
        &self,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        self.client()?.upsert_config(name, data).await
    }

    async fn apply_manifest(&self, manifest: &serde_json::Value) -> Result<(), ClusterError> {
        self.client()?.apply_manifest(manifest).await
    }

    async fn patch_node(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        taints: Vec<Taint>,
    ) -> Result<(), ClusterError> {
        self.client()?.patch_node(name, labels, taints).await
    }
}

/// In-memory platform, recording every call for assertions.
#[derive(Default)]
pub struct MemoryPlatform {
    pub state: Mutex<MemoryPlatformState>,
}

#[derive(Default)]
pub struct MemoryPlatformState {
    pub secrets: BTreeMap<String, BTreeMap<String, String>>,
    pub configs: BTreeMap<String, BTreeMap<String, String>>,
    pub manifests: Vec<serde_json::Value>,
    pub node_patches: Vec<(String, BTreeMap<String, String>, Vec<Taint>)>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlatformClient for MemoryPlatform {
    async fn upsert_secret(
        &self,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        self.state
            .lock()
            .expect("platform lock poisoned")
            .secrets
            .insert(name.to_string(), data);
        Ok(())
    }

    async fn upsert_config(
        &self,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        self.state
            .lock()
            .expect("platform lock poisoned")
            .configs
            .insert(name.to_string(), data);
        Ok(())
    }

    async fn apply_manifest(&self, manifest: &serde_json::Value) -> Result<(), ClusterError> {
        self.state
            .lock()
            .expect("platform lock poisoned")
            .manifests
            .push(manifest.clone());
        Ok(())
    }

    async fn patch_node(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        taints: Vec<Taint>,
    ) -> Result<(), ClusterError> {
        self.state
            .lock()
            .expect("platform lock poisoned")
            .node_patches
            .push((name.to_string(), labels, taints));
        Ok(())
    }
}

#[async_trait]
impl TokenStore for MemoryPlatform {
    async fn upsert(&self, record: TokenRecord) -> Result<(), ember_bootstrap::BootstrapError> {
        self.upsert_secret(&record.name, record.data)
            .await
            .map_err(|e| ember_bootstrap::BootstrapError::TokenStore(e.to_string()))
    }
}
