//! Shared cluster file store.
//!
//! Cluster PKI material that must be identical across all control-plane
//! replicas is kept in a replicated, transactional key/value store. The
//! first node to observe an empty record set generates the material and
//! inserts it transactionally; every other node loses that race and
//! performs a read-only download. Records are never overwritten.

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use ember_core::SharedStoreConfiguration;

use crate::ClusterError;

/// A shared-secret artifact: path, file mode, and raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterFile {
    pub name: PathBuf,
    pub mode: u32,
    pub data: Vec<u8>,
}

impl ClusterFile {
    /// Capture an existing on-disk file.
    pub fn from_path(path: &Path) -> Result<Self, ClusterError> {
        let data = std::fs::read(path)?;
        let mode = std::fs::metadata(path)?.permissions().mode() & 0o777;
        Ok(Self {
            name: path.to_path_buf(),
            mode,
            data,
        })
    }

    /// Write the file back to its recorded path with its recorded mode.
    pub fn write(&self) -> Result<(), ClusterError> {
        if let Some(parent) = self.name.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.name, &self.data)?;
        std::fs::set_permissions(&self.name, std::fs::Permissions::from_mode(self.mode))?;
        Ok(())
    }
}

/// Transactional table of shared cluster files.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Read every record. An empty result means no node has generated the
    /// cluster PKI yet.
    async fn load_all(&self) -> Result<Vec<ClusterFile>, ClusterError>;

    /// Insert the complete record set, failing with
    /// [`ClusterError::StoreConflict`] when any record already exists.
    /// First-writer-wins: a conflict means another node committed first and
    /// the caller must re-read and download.
    async fn insert_all(&self, files: Vec<ClusterFile>) -> Result<(), ClusterError>;
}

/// In-memory store used by tests and single-node runs.
#[derive(Default)]
pub struct MemoryFileStore {
    records: Mutex<BTreeMap<PathBuf, ClusterFile>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn load_all(&self) -> Result<Vec<ClusterFile>, ClusterError> {
        Ok(self
            .records
            .lock()
            .expect("file store lock poisoned")
            .values()
            .cloned()
            .collect())
    }

    async fn insert_all(&self, files: Vec<ClusterFile>) -> Result<(), ClusterError> {
        let mut records = self.records.lock().expect("file store lock poisoned");
        if !records.is_empty() {
            return Err(ClusterError::StoreConflict);
        }
        for file in files {
            records.insert(file.name.clone(), file);
        }
        Ok(())
    }
}

/// Store client speaking the replicated store's JSON gateway.
///
/// Records live under a namespace prefix; the transactional insert is a
/// single txn comparing the namespace marker's create revision to zero, so
/// exactly one node in a racing set can commit.
pub struct GatewayFileStore {
    client: reqwest::Client,
    endpoint: String,
    namespace: String,
}

#[derive(Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Deserialize)]
struct KeyValue {
    #[serde(default)]
    value: String,
}

#[derive(Deserialize)]
struct TxnResponse {
    #[serde(default)]
    succeeded: bool,
}

impl GatewayFileStore {
    /// Build a client from the store connection settings, including client
    /// TLS material when the endpoint is https.
    pub fn new(cfg: &SharedStoreConfiguration) -> Result<Self, ClusterError> {
        let endpoint = cfg.client_addr().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(ClusterError::Store("no store endpoints configured".to_string()));
        }
        let mut builder = reqwest::Client::builder().timeout(std::time::Duration::from_secs(10));
        if endpoint.starts_with("https://") {
            let ca = std::fs::read(&cfg.ca_file)?;
            builder = builder.add_root_certificate(
                reqwest::Certificate::from_pem(&ca)
                    .map_err(|e| ClusterError::Store(e.to_string()))?,
            );
            let mut identity = std::fs::read(&cfg.cert_file)?;
            identity.extend(std::fs::read(&cfg.key_file)?);
            builder = builder.identity(
                reqwest::Identity::from_pem(&identity)
                    .map_err(|e| ClusterError::Store(e.to_string()))?,
            );
        }
        Ok(Self {
            client: builder.build().map_err(|e| ClusterError::Store(e.to_string()))?,
            endpoint,
            namespace: "ember/files/".to_string(),
        })
    }

    fn key(&self, suffix: &str) -> String {
        BASE64.encode(format!("{}{}", self.namespace, suffix))
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, ClusterError> {
        let resp = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .json(&body)
            .send()
            .await
            .map_err(|e| ClusterError::Store(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ClusterError::Store(format!(
                "store returned {} for {}",
                resp.status(),
                path
            )));
        }
        resp.json()
            .await
            .map_err(|e| ClusterError::Store(e.to_string()))
    }
}

#[async_trait]
impl FileStore for GatewayFileStore {
    async fn load_all(&self) -> Result<Vec<ClusterFile>, ClusterError> {
        // Range over the namespace prefix; range_end is the prefix with its
        // last byte incremented.
        let mut end = self.namespace.clone().into_bytes();
        if let Some(last) = end.last_mut() {
            *last += 1;
        }
        let value = self
            .post(
                "/v3/kv/range",
                serde_json::json!({
                    "key": self.key(""),
                    "range_end": BASE64.encode(end),
                }),
            )
            .await?;
        let range: RangeResponse =
            serde_json::from_value(value).map_err(|e| ClusterError::Store(e.to_string()))?;
        let mut files = Vec::new();
        for kv in range.kvs {
            let raw = BASE64
                .decode(&kv.value)
                .map_err(|e| ClusterError::Store(e.to_string()))?;
            // The marker record carries no file payload.
            if raw.is_empty() {
                continue;
            }
            files.push(
                serde_json::from_slice(&raw).map_err(|e| ClusterError::Store(e.to_string()))?,
            );
        }
        Ok(files)
    }

    async fn insert_all(&self, files: Vec<ClusterFile>) -> Result<(), ClusterError> {
        let mut success = vec![serde_json::json!({
            "request_put": { "key": self.key("initialized"), "value": "" }
        })];
        for file in &files {
            let payload = serde_json::to_vec(file)?;
            let suffix = format!("file/{}", file.name.display());
            success.push(serde_json::json!({
                "request_put": { "key": self.key(&suffix), "value": BASE64.encode(payload) }
            }));
        }
        let value = self
            .post(
                "/v3/kv/txn",
                serde_json::json!({
                    "compare": [{
                        "key": self.key("initialized"),
                        "target": "CREATE",
                        "result": "EQUAL",
                        "create_revision": "0",
                    }],
                    "success": success,
                }),
            )
            .await?;
        let txn: TxnResponse =
            serde_json::from_value(value).map_err(|e| ClusterError::Store(e.to_string()))?;
        if !txn.succeeded {
            return Err(ClusterError::StoreConflict);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_writer_wins() {
        let store = MemoryFileStore::new();
        assert!(store.load_all().await.unwrap().is_empty());

        let first = vec![ClusterFile {
            name: PathBuf::from("/etc/ember/pki/ca.crt"),
            mode: 0o644,
            data: b"first".to_vec(),
        }];
        store.insert_all(first.clone()).await.unwrap();

        let second = vec![ClusterFile {
            name: PathBuf::from("/etc/ember/pki/ca.crt"),
            mode: 0o644,
            data: b"second".to_vec(),
        }];
        assert!(matches!(
            store.insert_all(second).await,
            Err(ClusterError::StoreConflict)
        ));

        // The loser re-reads and downloads the winner's records.
        let records = store.load_all().await.unwrap();
        assert_eq!(records, first);
    }

    #[test]
    fn test_cluster_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pki/ca.key");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"key material").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

        let file = ClusterFile::from_path(&path).unwrap();
        assert_eq!(file.mode, 0o600);

        let other = dir.path().join("copy/pki/ca.key");
        let copied = ClusterFile {
            name: other.clone(),
            ..file
        };
        copied.write().unwrap();
        assert_eq!(std::fs::read(&other).unwrap(), b"key material");
        let mode = std::fs::metadata(&other).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
