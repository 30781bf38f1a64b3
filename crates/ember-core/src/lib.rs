//! Ember Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - The container runtime
//! - The init system
//!
//! Everything needed to describe a node bootstrap lives here: typed
//! configuration for each node role, the resolved feature set, the
//! bootstrap token format, and the cluster-wide constants.

pub mod bundle;
pub mod config;
pub mod constants;
pub mod error;
pub mod features;
pub mod net;
pub mod token;

// Re-export commonly used types
pub use bundle::{AuthInfo, CredentialBundle};
pub use config::{
    ControlPlaneConfiguration, Endpoint, HandshakeConfiguration, NodeConfiguration,
    SharedStoreConfiguration, WorkerConfiguration,
};
pub use error::ConfigError;
pub use features::Features;
pub use token::BootstrapTokenString;
