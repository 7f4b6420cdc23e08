//! Credential retrieval for the source and target identities.
//!
//! How tokens are obtained (OAuth, session storage, pasted PATs) is outside
//! the daemon. The coordinator only asks a provider for each identity's
//! access token.

use axum::http::HeaderMap;
use migrator_core::{CredentialStatus, Identity};
use thiserror::Error;

/// Environment variable holding the fallback source token.
pub const SOURCE_TOKEN_ENV: &str = "GH_SOURCE_PAT";
/// Environment variable holding the fallback target token.
pub const TARGET_TOKEN_ENV: &str = "GH_PAT";

/// Request header carrying a per-request source token.
pub const SOURCE_TOKEN_HEADER: &str = "x-source-token";
/// Request header carrying a per-request target token.
pub const TARGET_TOKEN_HEADER: &str = "x-target-token";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("no {0} credential available")]
    Missing(Identity),
}

pub trait CredentialProvider: Send + Sync {
    fn access_token(&self, identity: Identity) -> Result<String, CredentialError>;

    fn authenticated(&self, identity: Identity) -> bool {
        self.access_token(identity).is_ok()
    }

    fn status(&self) -> CredentialStatus {
        CredentialStatus {
            source: self.authenticated(Identity::Source),
            target: self.authenticated(Identity::Target),
        }
    }
}

/// A fixed pair of optional tokens. Blank tokens count as missing.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    source: Option<String>,
    target: Option<String>,
}

impl CredentialSet {
    pub fn new(source: Option<String>, target: Option<String>) -> Self {
        Self {
            source: normalize(source),
            target: normalize(target),
        }
    }

    /// Read tokens from the daemon's own environment.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var(SOURCE_TOKEN_ENV).ok(),
            std::env::var(TARGET_TOKEN_ENV).ok(),
        )
    }

    /// Read per-request tokens from HTTP headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        Self::new(header(SOURCE_TOKEN_HEADER), header(TARGET_TOKEN_HEADER))
    }

    /// Fill any missing token from `fallback`.
    pub fn or(self, fallback: &CredentialSet) -> Self {
        Self {
            source: self.source.or_else(|| fallback.source.clone()),
            target: self.target.or_else(|| fallback.target.clone()),
        }
    }
}

fn normalize(token: Option<String>) -> Option<String> {
    token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

impl CredentialProvider for CredentialSet {
    fn access_token(&self, identity: Identity) -> Result<String, CredentialError> {
        let token = match identity {
            Identity::Source => &self.source,
            Identity::Target => &self.target,
        };
        token.clone().ok_or(CredentialError::Missing(identity))
    }
}

// Tokens must never reach logs through a stray `{:?}`.
impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("source", &self.source.as_ref().map(|_| "<redacted>"))
            .field("target", &self.target.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
