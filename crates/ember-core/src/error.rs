//! Core domain errors.

use std::fmt;

use thiserror::Error;

/// Configuration errors detected before any external call is made.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// One or more validation failures, reported together.
    #[error("invalid configuration:\n{0}")]
    Invalid(ErrorList),

    /// An unknown feature gate name was supplied.
    #[error("unknown feature gate: {0:?}")]
    UnknownFeatureGate(String),

    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Read(#[from] std::io::Error),

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A list of validation failures formatted one per line.
#[derive(Debug)]
pub struct ErrorList(pub Vec<String>);

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for msg in &self.0 {
            writeln!(f, "\t{}", msg)?;
        }
        Ok(())
    }
}

impl ConfigError {
    /// Build an `Invalid` error from collected validation messages.
    pub fn from_messages(msgs: Vec<String>) -> Self {
        ConfigError::Invalid(ErrorList(msgs))
    }
}
