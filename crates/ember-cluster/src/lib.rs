//! Node provisioning for ember.
//!
//! The [`engine`] sequences role-specific stage lists over a shared
//! configuration: certificates ([`stages::certs`]), credential bundles
//! ([`bundle`]), the node agent lifecycle ([`stages::agent`]), managed
//! component manifests ([`components`]), availability waiting ([`watch`]),
//! and post-start publishing ([`stages::poststart`]).
//!
//! External collaborators are consumed behind seams: the platform
//! management API ([`platform`]), the container runtime ([`runtime`]), the
//! init system ([`init`]), and the replicated store holding shared cluster
//! files ([`store`]).

pub mod bundle;
pub mod components;
pub mod engine;
pub mod init;
pub mod platform;
pub mod runtime;
pub mod stages;
pub mod store;
pub mod util;
pub mod watch;

mod error;

#[cfg(test)]
pub mod testutil;

pub use engine::{
    control_plane_stages, run_control_plane, run_worker, worker_stages, Engine, RuntimeConfig,
};
pub use error::{ClusterError, ComponentFailure};
pub use init::{InitSystem, Systemd};
pub use platform::{LazyPlatformClient, MemoryPlatform, PlatformClient, RestPlatformClient, Taint};
pub use runtime::{ContainerHandle, ContainerStatus, CrictlRuntime, RuntimeService};
pub use store::{ClusterFile, FileStore, GatewayFileStore, MemoryFileStore};
pub use watch::{AvailabilityWatcher, HealthProbe, HttpHealthProbe};
