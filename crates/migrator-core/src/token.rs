//! Opaque run tokens.
//!
//! A token correlates a run's background execution with later output polls.
//! Callers may rely on opacity and practical uniqueness only.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Number of random bytes behind each token (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Encoded length of a token: unpadded base64 of [`TOKEN_BYTES`].
pub const TOKEN_LEN: usize = 43;

/// Identifier for exactly one run output stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunToken(String);

impl RunToken {
    /// Generate a fresh token from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap a token received from a caller. No validation is done; unknown
    /// tokens simply miss in the registry.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RunToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
