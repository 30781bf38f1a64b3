//! ember node bootstrap CLI

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use ember_cluster::{Engine, RuntimeConfig};
use ember_core::constants::{
    AGENT_HEALTH_PORT, DEFAULT_BOOTSTRAP_TIMEOUT, MANUAL_TOKEN_TTL,
};
use ember_core::{ControlPlaneConfiguration, Features, WorkerConfiguration};

#[derive(Parser)]
#[command(name = "ember", about = "Bootstrap nodes into an ember cluster", version)]
struct Cli {
    /// Stream component output live instead of buffering it.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bootstrap this node into a cluster role.
    #[command(subcommand)]
    Up(UpCommand),

    /// Manage cluster certificates.
    #[command(subcommand)]
    Certs(CertsCommand),

    /// Generate cluster artifacts.
    #[command(subcommand)]
    Generate(GenerateCommand),
}

#[derive(Subcommand)]
enum UpCommand {
    /// Bootstrap a control-plane node.
    ControlPlane {
        /// Path of the control-plane configuration file (JSON).
        #[arg(short, long)]
        config: PathBuf,

        /// Overall deadline for the bootstrap, in seconds.
        #[arg(long, default_value_t = DEFAULT_BOOTSTRAP_TIMEOUT.as_secs())]
        timeout: u64,
    },
    /// Join a worker node.
    Worker {
        /// Path of the worker configuration file (JSON).
        #[arg(short, long)]
        config: PathBuf,

        /// Overall deadline for the bootstrap, in seconds.
        #[arg(long, default_value_t = DEFAULT_BOOTSTRAP_TIMEOUT.as_secs())]
        timeout: u64,
    },
}

#[derive(Subcommand)]
enum CertsCommand {
    /// Generate the cluster certificate authorities locally.
    Init {
        #[arg(long, default_value = "/etc/ember/pki")]
        cert_dir: PathBuf,
    },
    /// Renew cluster certificates and credential bundles.
    Renew {
        #[arg(long, default_value = "/etc/ember/pki")]
        cert_dir: PathBuf,

        #[arg(long, default_value = "/etc/ember")]
        cluster_dir: PathBuf,

        #[arg(long)]
        dry_run: bool,
    },
    /// List certificates in a directory.
    List {
        #[arg(long, default_value = "/etc/ember/pki")]
        cert_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum GenerateCommand {
    /// Generate a bootstrap token, optionally persisting it to the cluster.
    Token {
        /// Credential bundle used to persist the token record. When absent
        /// the token is only printed.
        #[arg(long)]
        bundle: Option<PathBuf>,
    },
    /// Print the CA pinning hash of a certificate.
    Hash {
        #[arg(long)]
        ca_cert: PathBuf,
    },
    /// Generate an admin credential bundle from an existing cluster CA.
    Bundle {
        #[arg(long, default_value = "/etc/ember/pki")]
        cert_dir: PathBuf,

        #[arg(long)]
        server: String,

        /// Merge the bundle into this bundle-set file instead of printing.
        #[arg(long)]
        merge_into: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("cannot initialize logging: {e}");
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Up(UpCommand::ControlPlane { config, timeout }) => {
            let mut cfg: ControlPlaneConfiguration = load_config(&config)?;
            let features = Features::resolve(&cfg.feature_gates)?;
            cfg.apply_runtime_defaults();
            let engine = control_plane_engine(&cfg, features, cli.verbose)?;
            tokio::time::timeout(
                Duration::from_secs(timeout),
                ember_cluster::run_control_plane(&engine, &mut cfg),
            )
            .await??;
            println!("control plane is up");
        }
        Command::Up(UpCommand::Worker { config, timeout }) => {
            let mut cfg: WorkerConfiguration = load_config(&config)?;
            let engine = worker_engine(&cfg, cli.verbose)?;
            tokio::time::timeout(
                Duration::from_secs(timeout),
                ember_cluster::run_worker(&engine, &mut cfg),
            )
            .await??;
            println!("worker has joined the cluster");
        }
        Command::Certs(CertsCommand::Init { cert_dir }) => {
            certs_init(&cert_dir)?;
        }
        Command::Certs(CertsCommand::Renew {
            cert_dir,
            cluster_dir,
            dry_run,
        }) => {
            certs_renew(&cert_dir, &cluster_dir, dry_run)?;
        }
        Command::Certs(CertsCommand::List { cert_dir }) => {
            certs_list(&cert_dir)?;
        }
        Command::Generate(GenerateCommand::Token { bundle }) => {
            generate_token(bundle.as_deref()).await?;
        }
        Command::Generate(GenerateCommand::Hash { ca_cert }) => {
            let hash = ember_pki::generate_cert_hash_from_file(&ca_cert)?;
            println!("{}", ember_pki::certhash::format_cert_hash(&hash));
        }
        Command::Generate(GenerateCommand::Bundle {
            cert_dir,
            server,
            merge_into,
        }) => {
            generate_bundle(&cert_dir, &server, merge_into.as_deref()).await?;
        }
    }
    Ok(())
}

fn load_config<T: serde::de::DeserializeOwned>(
    path: &std::path::Path,
) -> Result<T, Box<dyn std::error::Error>> {
    let data = std::fs::read(path)
        .map_err(|e| format!("failed to read configuration {}: {e}", path.display()))?;
    Ok(serde_json::from_slice(&data)?)
}

fn control_plane_engine(
    cfg: &ControlPlaneConfiguration,
    features: Features,
    verbose: bool,
) -> Result<Engine, Box<dyn std::error::Error>> {
    let admin_bundle = cfg.node.cluster_dir.join("admin.conf");
    Ok(Engine {
        rc: RuntimeConfig {
            verbose,
            ..RuntimeConfig::default()
        },
        features,
        platform: Arc::new(ember_cluster::LazyPlatformClient::new(&admin_bundle)),
        runtime: Arc::new(ember_cluster::CrictlRuntime::new(&cfg.node.runtime_socket)),
        init: Arc::new(ember_cluster::Systemd),
        store: Arc::new(ember_cluster::GatewayFileStore::new(&cfg.store)?),
        agent_probe: Arc::new(ember_cluster::HttpHealthProbe {
            url: format!("http://127.0.0.1:{AGENT_HEALTH_PORT}/healthz"),
            ca_path: None,
        }),
        api_probe: Arc::new(ember_cluster::HttpHealthProbe {
            url: format!("https://127.0.0.1:{}/healthz", cfg.api_bind_port),
            ca_path: Some(cfg.node.pki_dir().join("ca.crt")),
        }),
    })
}

fn worker_engine(
    cfg: &WorkerConfiguration,
    verbose: bool,
) -> Result<Engine, Box<dyn std::error::Error>> {
    Ok(Engine {
        rc: RuntimeConfig {
            verbose,
            ..RuntimeConfig::default()
        },
        features: Features::default(),
        platform: Arc::new(ember_cluster::LazyPlatformClient::new(
            cfg.node.cluster_dir.join("agent-bootstrap.conf"),
        )),
        runtime: Arc::new(ember_cluster::CrictlRuntime::new(&cfg.node.runtime_socket)),
        init: Arc::new(ember_cluster::Systemd),
        store: Arc::new(ember_cluster::MemoryFileStore::new()),
        agent_probe: Arc::new(ember_cluster::HttpHealthProbe {
            url: format!("http://127.0.0.1:{AGENT_HEALTH_PORT}/healthz"),
            ca_path: None,
        }),
        api_probe: Arc::new(ember_cluster::HttpHealthProbe {
            url: format!("https://{}/healthz", cfg.control_plane_endpoint),
            ca_path: Some(cfg.ca_cert.clone()),
        }),
    })
}

fn certs_init(cert_dir: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    for (name, common_name) in [
        ("ca", "ember"),
        ("front-proxy-ca", "front-proxy-ca"),
        ("auth-proxy-ca", "auth-proxy-ca"),
    ] {
        if cert_dir.join(format!("{name}.key")).exists() {
            println!("{name} already exists, skipping");
            continue;
        }
        let ca = ember_pki::CertificateAuthority::new(
            name,
            &ember_pki::CertificateConfig {
                common_name: common_name.to_string(),
                ..ember_pki::CertificateConfig::default()
            },
        )?;
        ca.write_files(cert_dir)?;
        println!("created {name}");
    }
    if !cert_dir.join("sa.key").exists() {
        ember_pki::write_service_account_key(cert_dir, "sa")?;
        println!("created sa");
    }
    Ok(())
}

/// The certificate tree renewed in place: each CA re-signs its leaves.
const CERT_TREE: &[(&str, &[&str])] = &[
    (
        "ca",
        &[
            "apiserver",
            "apiserver-agent-client",
            "apiserver-healthcheck-client",
        ],
    ),
    ("front-proxy-ca", &["front-proxy-client"]),
];

const BUNDLE_NAMES: &[&str] = &["admin", "controller-manager", "scheduler"];

fn certs_renew(
    cert_dir: &std::path::Path,
    cluster_dir: &std::path::Path,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    for (ca_name, leaves) in CERT_TREE {
        let ca = ember_pki::load_certificate_authority(cert_dir, ca_name)?;
        for leaf in *leaves {
            ember_pki::renew_key_pair(cert_dir, &ca, leaf, dry_run)?;
            println!("renewed {leaf}");
        }
    }
    let ca = ember_pki::load_certificate_authority(cert_dir, "ca")?;
    for name in BUNDLE_NAMES {
        let path = cluster_dir.join(format!("{name}.conf"));
        if !path.exists() {
            continue;
        }
        ember_cluster::bundle::renew_bundle(&path, &ca, dry_run)?;
        println!("renewed {name}.conf");
    }
    Ok(())
}

fn certs_list(cert_dir: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut entries: Vec<_> = std::fs::read_dir(cert_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|ext| ext.to_str()) == Some("crt"))
        .collect();
    entries.sort();
    for path in entries {
        let pem = std::fs::read_to_string(&path)?;
        let config = ember_pki::renew::config_from_cert_pem(&pem)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        println!("{name}\tCN={}", config.common_name);
    }
    Ok(())
}

async fn generate_token(
    bundle: Option<&std::path::Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    match bundle {
        Some(path) => {
            let bundle = ember_core::CredentialBundle::load(path)?;
            let client = ember_cluster::RestPlatformClient::from_bundle(&bundle)?;
            let token = ember_bootstrap::create_bootstrap_token(&client, MANUAL_TOKEN_TTL).await?;
            println!("{token}");
        }
        None => {
            let (id, secret) = ember_pki::generate_bootstrap_token();
            println!("{id}.{secret}");
        }
    }
    Ok(())
}

async fn generate_bundle(
    cert_dir: &std::path::Path,
    server: &str,
    merge_into: Option<&std::path::Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let ca = ember_pki::load_certificate_authority(cert_dir, "ca")?;
    let bundle =
        ember_cluster::bundle::client_bundle(&ca, server, "ember-admin", &["system:masters"])?;
    match merge_into {
        Some(path) => {
            ember_cluster::bundle::merge_into_file(path, &bundle).await?;
            println!("merged bundle into {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&bundle)?),
    }
    Ok(())
}
