//! Bootstrap token textual format.
//!
//! A bootstrap token is a short-lived `<id>.<secret>` credential allowing a
//! joining node to authenticate before it holds a full client certificate.
//! The id is 6 characters and the secret 16, both drawn from `[0-9a-z]`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of characters in the token id.
pub const TOKEN_ID_LEN: usize = 6;

/// Number of characters in the token secret.
pub const TOKEN_SECRET_LEN: usize = 16;

/// Errors produced when parsing a bootstrap token string.
#[derive(Debug, Error)]
pub enum TokenParseError {
    #[error("bootstrap token must have the form <id>.<secret>")]
    MissingSeparator,

    #[error("bootstrap token id must be {TOKEN_ID_LEN} characters of [0-9a-z], got {0:?}")]
    InvalidId(String),

    #[error("bootstrap token secret must be {TOKEN_SECRET_LEN} characters of [0-9a-z], got {0:?}")]
    InvalidSecret(String),
}

/// A validated `<id>.<secret>` bootstrap token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BootstrapTokenString {
    id: String,
    secret: String,
}

impl BootstrapTokenString {
    /// Assemble a token from already-generated id and secret parts.
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Result<Self, TokenParseError> {
        let id = id.into();
        let secret = secret.into();
        if id.len() != TOKEN_ID_LEN || !is_token_chars(&id) {
            return Err(TokenParseError::InvalidId(id));
        }
        if secret.len() != TOKEN_SECRET_LEN || !is_token_chars(&secret) {
            return Err(TokenParseError::InvalidSecret(secret));
        }
        Ok(Self { id, secret })
    }

    /// The public token id, safe to log.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The token secret. Never log this.
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

fn is_token_chars(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

impl fmt::Display for BootstrapTokenString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.secret)
    }
}

impl FromStr for BootstrapTokenString {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, secret) = s.split_once('.').ok_or(TokenParseError::MissingSeparator)?;
        Self::new(id, secret)
    }
}

impl TryFrom<String> for BootstrapTokenString {
    type Error = TokenParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BootstrapTokenString> for String {
    fn from(t: BootstrapTokenString) -> String {
        t.to_string()
    }
}
