//! Identity verification providers.

pub mod cloud_identity;

pub use cloud_identity::{DocumentVerifier, InstanceApi, InstanceInfo, RestInstanceApi};
