//! Joining-node side of the handshake.

use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use ember_core::constants::{DEFAULT_CLUSTER_NAME, TOKEN_USER};
use ember_core::{BootstrapTokenString, CredentialBundle, WorkerConfiguration};

use crate::metadata::{MetadataClient, DEFAULT_METADATA_URL};
use crate::types::{AuthorizationRequest, AuthorizationResponse, AuthorizationType};
use crate::BootstrapError;

/// Tunables for the dynamic handshake. The defaults match production
/// behavior; tests shrink them.
#[derive(Debug, Clone)]
pub struct JoinOptions {
    /// Interval between discovery and authorization attempts.
    pub poll_interval: Duration,

    /// Overall deadline for the authorization phase. Discovery polls
    /// forever.
    pub authorize_timeout: Duration,

    /// Base URL of the instance metadata service.
    pub metadata_url: String,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            authorize_timeout: Duration::from_secs(5 * 60),
            metadata_url: DEFAULT_METADATA_URL.to_string(),
        }
    }
}

/// Obtain a credential bundle for a joining worker.
///
/// With a pre-shared token the bundle is built directly from the cluster CA
/// certificate; otherwise the dynamic handshake is performed against the
/// authorization server.
pub async fn bootstrap_credentials(
    cfg: &WorkerConfiguration,
    opts: &JoinOptions,
) -> Result<CredentialBundle, BootstrapError> {
    let ca_pem = read_ca_cert(&cfg.ca_cert)?;
    let token = match &cfg.bootstrap_token {
        Some(token) => token.clone(),
        None => request_bootstrap_token(cfg, &ca_pem, opts).await?,
    };
    Ok(CredentialBundle::with_token(
        format!("https://{}", cfg.control_plane_endpoint),
        DEFAULT_CLUSTER_NAME,
        TOKEN_USER,
        &ca_pem,
        token,
    ))
}

fn read_ca_cert(path: &Path) -> Result<Vec<u8>, BootstrapError> {
    std::fs::read(path).map_err(|source| BootstrapError::ReadCaCert {
        path: path.to_path_buf(),
        source,
    })
}

/// Perform the dynamic handshake: discover the provider, build the
/// identity assertion, and poll the authorization endpoint for a token.
async fn request_bootstrap_token(
    cfg: &WorkerConfiguration,
    ca_pem: &[u8],
    opts: &JoinOptions,
) -> Result<BootstrapTokenString, BootstrapError> {
    let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(2));
    match reqwest::Certificate::from_pem(ca_pem) {
        Ok(ca) => builder = builder.add_root_certificate(ca),
        Err(e) => warn!(error = %e, "cannot add cluster CA certificate to trust roots"),
    }
    let client = builder.build().map_err(BootstrapError::Client)?;

    let discovery_url = format!("{}/authorize", cfg.bootstrap_server_url);

    // Discovery polls with infinite retry: the authorization server may not
    // be scheduled yet while the control plane comes up.
    let provider = loop {
        match discover_provider(&client, &discovery_url).await {
            Ok(provider) => break provider,
            Err(e) => debug!(error = %e, "authorization server not ready"),
        }
        tokio::time::sleep(opts.poll_interval).await;
    };

    let request = match provider {
        AuthorizationType::CloudIdentity => {
            let body = MetadataClient::new(&opts.metadata_url)?.signed_document().await?;
            AuthorizationRequest {
                auth_type: AuthorizationType::CloudIdentity,
                body: serde_json::to_value(&body)?,
            }
        }
        AuthorizationType::Unknown => {
            return Err(BootstrapError::UnknownProvider("unknown".to_string()))
        }
    };

    let deadline = Instant::now() + opts.authorize_timeout;
    loop {
        match authorize_once(&client, &discovery_url, &request).await {
            Ok(Some(token)) => return Ok(token),
            Ok(None) => {}
            Err(e @ BootstrapError::Rejected(_)) => return Err(e),
            Err(e @ BootstrapError::MalformedToken(_)) => return Err(e),
            Err(e) => warn!(error = %e, "cannot authorize"),
        }
        if Instant::now() + opts.poll_interval > deadline {
            return Err(BootstrapError::DeadlineExceeded("waiting for authorization"));
        }
        tokio::time::sleep(opts.poll_interval).await;
    }
}

async fn discover_provider(
    client: &reqwest::Client,
    url: &str,
) -> Result<AuthorizationType, BootstrapError> {
    #[derive(serde::Deserialize)]
    struct Discovery {
        provider: AuthorizationType,
    }
    let resp = client.get(url).send().await.map_err(BootstrapError::Client)?;
    let discovery: Discovery = resp.json().await.map_err(BootstrapError::Client)?;
    Ok(discovery.provider)
}

/// A single authorization attempt. `Ok(None)` means inconclusive: retry
/// within the outer deadline. An explicit server error is terminal.
async fn authorize_once(
    client: &reqwest::Client,
    url: &str,
    request: &AuthorizationRequest,
) -> Result<Option<BootstrapTokenString>, BootstrapError> {
    let resp = client
        .post(url)
        .json(request)
        .send()
        .await
        .map_err(BootstrapError::Client)?;
    let body = resp.bytes().await.map_err(BootstrapError::Client)?;
    let response: AuthorizationResponse = match serde_json::from_slice(&body) {
        Ok(response) => response,
        // A non-200 without a parseable error body is transient.
        Err(_) => return Ok(None),
    };
    if let Some(error) = response.error {
        return Err(BootstrapError::Rejected(error));
    }
    match response.bootstrap_token {
        Some(token) if !token.is_empty() => Ok(Some(token.parse()?)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::routing::get;
    use axum::{Json, Router};

    use ember_core::bundle::AuthInfo;
    use ember_core::Endpoint;

    use super::*;

    fn worker_config(dir: &Path, server_url: &str, token: Option<&str>) -> WorkerConfiguration {
        let ca_cert = dir.join("ca.crt");
        std::fs::write(&ca_cert, test_ca_pem()).unwrap();
        WorkerConfiguration {
            control_plane_endpoint: Endpoint {
                host: "10.0.0.1".to_string(),
                port: 6443,
            },
            bootstrap_token: token.map(|t| t.parse().unwrap()),
            bootstrap_server_url: server_url.to_string(),
            ca_cert,
            ..WorkerConfiguration::default()
        }
    }

    fn test_ca_pem() -> String {
        let ca = ember_pki::CertificateAuthority::new(
            "ca",
            &ember_pki::CertificateConfig {
                common_name: "ember".to_string(),
                ..ember_pki::CertificateConfig::default()
            },
        )
        .unwrap();
        ca.cert_pem().to_string()
    }

    fn fast_options(metadata_url: String) -> JoinOptions {
        JoinOptions {
            poll_interval: Duration::from_millis(20),
            authorize_timeout: Duration::from_secs(2),
            metadata_url,
        }
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_pre_shared_token_skips_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = worker_config(
            dir.path(),
            "https://unreachable.invalid:8080",
            Some("abcdef.0123456789abcdef"),
        );
        let bundle = bootstrap_credentials(&cfg, &JoinOptions::default())
            .await
            .unwrap();
        assert_eq!(bundle.server, "https://10.0.0.1:6443");
        assert_eq!(bundle.user, TOKEN_USER);
        match bundle.auth {
            AuthInfo::Token { token } => assert_eq!(token.to_string(), "abcdef.0123456789abcdef"),
            other => panic!("expected token auth, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dynamic_handshake_retries_then_succeeds() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_handler = attempts.clone();
        let router = Router::new()
            .route(
                "/authorize",
                get(|| async {
                    Json(serde_json::json!({ "provider": "cloud-identity" }))
                })
                .post(move |body: axum::body::Bytes| {
                    let attempts = attempts_handler.clone();
                    async move {
                        let req: AuthorizationRequest = serde_json::from_slice(&body).unwrap();
                        assert_eq!(req.auth_type, AuthorizationType::CloudIdentity);
                        // First attempt is inconclusive; second succeeds.
                        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                            Json(serde_json::json!({}))
                        } else {
                            Json(serde_json::json!({
                                "bootstrapToken": "abcdef.0123456789abcdef"
                            }))
                        }
                    }
                }),
            )
            .route(
                "/instance-identity/document",
                get(|| async { r#"{"instanceId":"i-0abc"}"# }),
            )
            .route("/instance-identity/signature", get(|| async { "c2ln" }));
        let addr = serve(router).await;

        let dir = tempfile::tempdir().unwrap();
        let cfg = worker_config(dir.path(), &format!("http://{addr}"), None);
        let opts = fast_options(format!("http://{addr}"));
        let bundle = bootstrap_credentials(&cfg, &opts).await.unwrap();
        match bundle.auth {
            AuthInfo::Token { token } => assert_eq!(token.to_string(), "abcdef.0123456789abcdef"),
            other => panic!("expected token auth, got {:?}", other),
        }
        assert!(attempts.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_explicit_error_is_terminal() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_handler = attempts.clone();
        let router = Router::new()
            .route(
                "/authorize",
                get(|| async {
                    Json(serde_json::json!({ "provider": "cloud-identity" }))
                })
                .post(move || {
                    let attempts = attempts_handler.clone();
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        (
                            axum::http::StatusCode::UNAUTHORIZED,
                            Json(serde_json::json!({ "error": "account not authorized" })),
                        )
                    }
                }),
            )
            .route(
                "/instance-identity/document",
                get(|| async { r#"{"instanceId":"i-0abc"}"# }),
            )
            .route("/instance-identity/signature", get(|| async { "c2ln" }));
        let addr = serve(router).await;

        let dir = tempfile::tempdir().unwrap();
        let cfg = worker_config(dir.path(), &format!("http://{addr}"), None);
        let opts = fast_options(format!("http://{addr}"));
        let err = bootstrap_credentials(&cfg, &opts).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Rejected(msg) if msg == "account not authorized"));
        assert_eq!(
            attempts.load(Ordering::SeqCst),
            1,
            "terminal errors must not be retried"
        );
    }

    #[tokio::test]
    async fn test_unknown_provider_aborts() {
        let router = Router::new().route(
            "/authorize",
            get(|| async { Json(serde_json::json!({ "provider": "somebody-else" })) }),
        );
        let addr = serve(router).await;

        let dir = tempfile::tempdir().unwrap();
        let cfg = worker_config(dir.path(), &format!("http://{addr}"), None);
        let opts = fast_options(format!("http://{addr}"));
        let err = bootstrap_credentials(&cfg, &opts).await.unwrap_err();
        assert!(matches!(err, BootstrapError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn test_inconclusive_responses_exhaust_deadline() {
        // POST /authorize is not routed, so every attempt yields a
        // non-parseable error body and stays transient until the authorize
        // deadline expires.
        let router = Router::new()
            .route(
                "/authorize",
                get(|| async { Json(serde_json::json!({ "provider": "cloud-identity" })) }),
            )
            .route(
                "/instance-identity/document",
                get(|| async { r#"{"instanceId":"i-0abc"}"# }),
            )
            .route("/instance-identity/signature", get(|| async { "c2ln" }));
        let addr = serve(router).await;

        let dir = tempfile::tempdir().unwrap();
        let cfg = worker_config(dir.path(), &format!("http://{addr}"), None);
        let opts = JoinOptions {
            poll_interval: Duration::from_millis(20),
            authorize_timeout: Duration::from_millis(200),
            metadata_url: format!("http://{addr}"),
        };
        let err = bootstrap_credentials(&cfg, &opts).await.unwrap_err();
        assert!(matches!(err, BootstrapError::DeadlineExceeded(_)));
    }
}
