//! Core types shared by the migration daemon and its client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::token::RunToken;

/// Which side of a migration a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    Source,
    Target,
}

impl Identity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Target => "target",
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the external tool is driven for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Generate a script for every repository in the org, then execute it.
    Bulk,
    /// Migrate exactly one named repository directly.
    SingleRepo,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bulk => "bulk",
            Self::SingleRepo => "single_repo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    #[error("source org must not be empty")]
    EmptySourceOrg,
    #[error("target org must not be empty")]
    EmptyTargetOrg,
}

/// Parameters of a migration run, as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParams {
    pub source_org: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_repo: Option<String>,
    pub target_org: String,
    /// Alternate API base URL for a GitHub Enterprise Server source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ghes_api_url: Option<String>,
}

impl RunParams {
    pub fn new(source_org: impl Into<String>, target_org: impl Into<String>) -> Self {
        Self {
            source_org: source_org.into(),
            source_repo: None,
            target_org: target_org.into(),
            ghes_api_url: None,
        }
    }

    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.source_repo = Some(repo.into());
        self
    }

    pub fn with_ghes_api_url(mut self, url: impl Into<String>) -> Self {
        self.ghes_api_url = Some(url.into());
        self
    }

    /// The repository name, if one was given and is not blank.
    pub fn repo(&self) -> Option<&str> {
        self.source_repo
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    /// An empty repo name selects bulk mode.
    pub fn mode(&self) -> RunMode {
        if self.repo().is_some() {
            RunMode::SingleRepo
        } else {
            RunMode::Bulk
        }
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.source_org.trim().is_empty() {
            return Err(ParamsError::EmptySourceOrg);
        }
        if self.target_org.trim().is_empty() {
            return Err(ParamsError::EmptyTargetOrg);
        }
        Ok(())
    }
}

/// Handle returned when a run has been admitted and started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTicket {
    pub token: RunToken,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
}

/// Result of one output poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub lines: Vec<String>,
    pub done: bool,
}

/// Whether each identity currently has a usable credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialStatus {
    pub source: bool,
    pub target: bool,
}

impl CredentialStatus {
    pub fn ready(&self) -> bool {
        self.source && self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_repo_selects_bulk_mode() {
        let params = RunParams::new("acme", "beta");
        assert_eq!(params.mode(), RunMode::Bulk);

        let params = RunParams::new("acme", "beta").with_repo("  ");
        assert_eq!(params.mode(), RunMode::Bulk);
        assert_eq!(params.repo(), None);
    }

    #[test]
    fn named_repo_selects_single_repo_mode() {
        let params = RunParams::new("acme", "beta").with_repo("widgets");
        assert_eq!(params.mode(), RunMode::SingleRepo);
        assert_eq!(params.repo(), Some("widgets"));
    }

    #[test]
    fn validate_rejects_blank_orgs() {
        assert_eq!(
            RunParams::new("", "beta").validate(),
            Err(ParamsError::EmptySourceOrg)
        );
        assert_eq!(
            RunParams::new("acme", " ").validate(),
            Err(ParamsError::EmptyTargetOrg)
        );
        assert!(RunParams::new("acme", "beta").validate().is_ok());
    }

    #[test]
    fn run_params_deserialize_without_optional_fields() {
        let params: RunParams =
            serde_json::from_str(r#"{"source_org":"acme","target_org":"beta"}"#).unwrap();
        assert_eq!(params, RunParams::new("acme", "beta"));
    }

    #[test]
    fn run_mode_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunMode::SingleRepo).unwrap(),
            "\"single_repo\""
        );
        assert_eq!(RunMode::Bulk.as_str(), "bulk");
    }

    #[test]
    fn credential_status_ready_requires_both() {
        let status = CredentialStatus {
            source: true,
            target: false,
        };
        assert!(!status.ready());
        assert!(CredentialStatus {
            source: true,
            target: true
        }
        .ready());
    }
}
