//! Node join handshake for ember.
//!
//! Two paths bring a node into the cluster:
//!
//! - **Pre-shared token**: the node already holds a bootstrap token and
//!   builds its credential bundle directly, without any network handshake.
//! - **Dynamic handshake**: the node proves its cloud identity to the
//!   authorization server ([`server`]) by presenting the signed instance
//!   identity document fetched from the metadata service, and receives a
//!   freshly minted short-lived bootstrap token in return.

pub mod join;
pub mod metadata;
pub mod providers;
pub mod server;
pub mod token;
pub mod types;

mod error;

pub use error::BootstrapError;
pub use join::{bootstrap_credentials, JoinOptions};
pub use server::{create_router, AppState};
pub use token::{create_bootstrap_token, MemoryTokenStore, TokenRecord, TokenStore};
pub use types::{
    AuthorizationRequest, AuthorizationResponse, AuthorizationType, IdentityDocument,
    SignedDocument,
};
