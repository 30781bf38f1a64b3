//! Cluster-wide constants.

use std::time::Duration;

/// Default cluster name used in credential bundles.
pub const DEFAULT_CLUSTER_NAME: &str = "ember";

/// Default directory holding cluster state, PKI material, and manifests.
pub const DEFAULT_CLUSTER_DIR: &str = "/etc/ember";

/// Name of the node agent service unit managed by the init system.
pub const DEFAULT_AGENT_SERVICE: &str = "ember-agent.service";

/// Default API server bind port.
pub const DEFAULT_API_SERVER_PORT: u16 = 6443;

/// Default handshake authorization server port.
pub const DEFAULT_AUTHD_PORT: u16 = 8080;

/// Default shared-store client port.
pub const DEFAULT_STORE_PORT: u16 = 2379;

/// Agent local health endpoint port.
pub const AGENT_HEALTH_PORT: u16 = 10248;

/// User name bound to a bootstrap token in credential bundles.
pub const TOKEN_USER: &str = "tls-bootstrap-token-user";

/// Group granted to nodes joining with a bootstrap token.
pub const TOKEN_EXTRA_GROUPS: &str = "system:bootstrappers:ember:default-node-token";

/// Name of the published cluster configuration record.
pub const CLUSTER_CONFIG_NAME: &str = "ember-config";

/// Component label value of the API server container.
pub const API_SERVER_COMPONENT: &str = "ember-apiserver";

/// Label key used by the node agent to mark managed component containers.
pub const COMPONENT_LABEL: &str = "io.ember.component";

/// Overall deadline for a full node bootstrap.
pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Deadline for the availability watcher.
pub const DEFAULT_AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(4 * 60);

/// Deadline for local node agent readiness after start.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Validity of tokens minted by the handshake server.
pub const HANDSHAKE_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Validity of manually minted tokens.
pub const MANUAL_TOKEN_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Lowest platform version ember will provision.
pub const MIN_PLATFORM_VERSION: &str = "1.0.0";

/// Highest platform version ember will provision. Versions above this only
/// produce a warning.
pub const MAX_PLATFORM_VERSION: &str = "1.3.0";
