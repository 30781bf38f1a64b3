//! Handshake authorization server.
//!
//! ```text
//! GET  /authorize              -> 200 {"provider": "<name>"}
//! POST /authorize {"type":..,"body":..}
//!                              -> 200 {"bootstrapToken":"<id>.<secret>"}
//!                                 400/401/500 {"error":"<message>"}
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use ember_core::constants::HANDSHAKE_TOKEN_TTL;

use crate::providers::{DocumentVerifier, InstanceApi};
use crate::token::{create_bootstrap_token, TokenStore};
use crate::types::{
    AuthorizationRequest, AuthorizationResponse, AuthorizationType, IdentityDocument,
    SignedDocument,
};

/// Deadline for a single instance lookup against the cloud control API.
const INSTANCE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared authorization server state.
pub struct AppState {
    /// The identity verification strategy offered to joining nodes.
    pub provider: AuthorizationType,

    /// Operator-configured allow-list filters, applied in key order.
    pub filters: BTreeMap<String, String>,

    pub verifier: DocumentVerifier,
    pub instances: Arc<dyn InstanceApi>,
    pub tokens: Arc<dyn TokenStore>,
}

/// Create the handshake router. The health endpoint is registered outside
/// the trace layer so probes do not flood the request log.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/authorize", get(discover).post(authorize))
        .layer(TraceLayer::new_for_http())
        .route("/healthz", get(health_check))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Discovery endpoint: announces which provider the server accepts.
async fn discover(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "provider": state.provider }))
}

/// Authorization endpoint: verifies a node's identity assertion and mints a
/// short-lived bootstrap token.
async fn authorize(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let req: AuthorizationRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    match req.auth_type {
        AuthorizationType::CloudIdentity => authorize_cloud_identity(&state, addr, req.body).await,
        AuthorizationType::Unknown => error_response(
            StatusCode::BAD_REQUEST,
            "unknown auth type: \"unknown\"".to_string(),
        ),
    }
}

/// The ordered cloud-identity verification chain. Each step short-circuits
/// on failure; in particular, no cloud API call is made for a request whose
/// document signature does not verify.
async fn authorize_cloud_identity(
    state: &AppState,
    addr: SocketAddr,
    body: serde_json::Value,
) -> Response {
    let sdoc: SignedDocument = match serde_json::from_value(body) {
        Ok(sdoc) => sdoc,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    if let Err(e) = state.verifier.verify(sdoc.document.as_bytes(), &sdoc.signature) {
        warn!(peer = %addr, "document signature verification failed");
        return error_response(StatusCode::UNAUTHORIZED, e.to_string());
    }

    let doc: IdentityDocument = match serde_json::from_str(&sdoc.document) {
        Ok(doc) => doc,
        Err(e) => return error_response(StatusCode::UNAUTHORIZED, e.to_string()),
    };

    let lookup = tokio::time::timeout(
        INSTANCE_LOOKUP_TIMEOUT,
        state.instances.describe_instance(&doc.region, &doc.instance_id),
    )
    .await;
    let info = match lookup {
        Ok(Ok(info)) => info,
        Ok(Err(e)) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Err(_) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("instance lookup timed out: {}", doc.instance_id),
            )
        }
    };

    let observed_ip = addr.ip().to_string();
    if observed_ip != info.private_ip {
        return error_response(
            StatusCode::UNAUTHORIZED,
            format!("expected ip {:?}, received {:?}", info.private_ip, observed_ip),
        );
    }

    for (key, value) in &state.filters {
        match key.as_str() {
            "account-id" => {
                if doc.account_id != *value {
                    return error_response(
                        StatusCode::UNAUTHORIZED,
                        format!("account not authorized: {:?}", doc.account_id),
                    );
                }
            }
            "iam-profile" => {
                if info.iam_profile != *value {
                    return error_response(
                        StatusCode::UNAUTHORIZED,
                        format!("IAM instance profile not authorized: {:?}", info.iam_profile),
                    );
                }
            }
            _ => {}
        }
    }

    match create_bootstrap_token(state.tokens.as_ref(), HANDSHAKE_TOKEN_TTL).await {
        Ok(token) => {
            info!(instance_id = %doc.instance_id, peer = %addr, "node authorized");
            (
                StatusCode::OK,
                Json(AuthorizationResponse {
                    bootstrap_token: Some(token.to_string()),
                    ..Default::default()
                }),
            )
                .into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(AuthorizationResponse {
            error: Some(message),
            ..Default::default()
        }),
    )
        .into_response()
}
