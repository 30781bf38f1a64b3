//! PKI errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during PKI operations.
#[derive(Debug, Error)]
pub enum PkiError {
    #[error("unable to generate private key: {0}")]
    KeyGeneration(rcgen::Error),

    #[error("unable to generate certificate: {0}")]
    CertGeneration(rcgen::Error),

    #[error("unable to sign certificate: {0}")]
    Signing(rcgen::Error),

    #[error("failed to read certificate {path:?}: {source}")]
    ReadCert {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read private key {path:?}: {source}")]
    ReadKey {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse certificate: {0}")]
    ParseCert(String),

    #[error("failed to parse private key: {0}")]
    ParseKey(String),

    #[error("certificate {0:?} has expired")]
    Expired(String),

    #[error("certificate {0:?} is not valid yet")]
    NotYetValid(String),

    #[error("{0:?} is not a valid subject alternative name")]
    InvalidAltName(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
