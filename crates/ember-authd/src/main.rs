//! ember handshake authorization server
//!
//! Verifies the cloud identity of joining nodes and mints short-lived
//! bootstrap tokens for them.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ember_bootstrap::providers::{DocumentVerifier, RestInstanceApi};
use ember_bootstrap::{create_router, AppState, AuthorizationType};
use ember_core::constants::DEFAULT_AUTHD_PORT;

#[derive(Parser)]
#[command(
    name = "ember-authd",
    about = "Authorize joining nodes and mint bootstrap tokens",
    version
)]
struct Cli {
    /// Identity provider offered to joining nodes.
    #[arg(long, default_value = "cloud-identity")]
    provider: String,

    /// Allow-list filter as key=value; repeatable. Supported keys:
    /// account-id, iam-profile.
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// PEM file carrying the provider's document-signing public key (a
    /// PUBLIC KEY or CERTIFICATE block).
    #[arg(long)]
    provider_key: PathBuf,

    /// Base URL of the cloud instance-description API.
    #[arg(long)]
    instance_api: String,

    /// Credential bundle used to persist minted token records.
    #[arg(long)]
    bundle: PathBuf,

    /// TLS certificate. When absent the server listens in plain HTTP
    /// behind the platform's TLS termination.
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// TLS private key.
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_AUTHD_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("cannot initialize logging: {e}");
    }

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.provider != AuthorizationType::CloudIdentity.as_str() {
        return Err(format!("unsupported provider: {:?}", cli.provider).into());
    }

    let mut filters = BTreeMap::new();
    for filter in &cli.filters {
        let (key, value) = filter
            .split_once('=')
            .ok_or_else(|| format!("invalid filter {filter:?}, expected key=value"))?;
        match key {
            "account-id" | "iam-profile" => {
                filters.insert(key.to_string(), value.to_string());
            }
            _ => return Err(format!("unsupported filter key: {key:?}").into()),
        }
    }

    let provider_key = std::fs::read_to_string(&cli.provider_key)?;
    let bundle = ember_core::CredentialBundle::load(&cli.bundle)?;
    let platform = ember_cluster::RestPlatformClient::from_bundle(&bundle)?;

    let state = Arc::new(AppState {
        provider: AuthorizationType::CloudIdentity,
        filters,
        verifier: DocumentVerifier::from_pem(&provider_key)?,
        instances: Arc::new(RestInstanceApi::new(&cli.instance_api)?),
        tokens: Arc::new(platform),
    });
    let router = create_router(state)
        .into_make_service_with_connect_info::<SocketAddr>();

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    match (&cli.cert, &cli.key) {
        (Some(cert), Some(key)) => {
            info!(%addr, "authorization server listening (TLS)");
            let tls = RustlsConfig::from_pem_file(cert, key).await?;
            axum_server::bind_rustls(addr, tls).serve(router).await?;
        }
        _ => {
            info!(%addr, "authorization server listening");
            axum_server::bind(addr).serve(router).await?;
        }
    }
    Ok(())
}
