//! Run coordination: admission, launch, token issue and output polling.
//!
//! One `RunCoordinator` is built at startup and shared behind an `Arc`.

use std::sync::Arc;

use chrono::Utc;
use migrator_core::{Config, CredentialStatus, Identity, OutputChunk, RunParams, RunTicket, RunToken};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::admission::AdmissionGate;
use crate::collector;
use crate::credentials::{CredentialError, CredentialProvider};
use crate::launcher::{LaunchError, Launcher};
use crate::registry::{OutputRegistry, RegistryError};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("another migration is already starting")]
    AdmissionDenied,
    #[error("missing {0} credential")]
    CredentialMissing(Identity),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("script generation failed (exit code {})", .exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    ScriptGenerationFailed {
        exit_code: Option<i32>,
        output: Vec<String>,
    },
    #[error("script generation timed out after {0} seconds")]
    GenerationTimedOut(u32),
    #[error("migration tool not found: {0}")]
    ToolNotFound(String),
    #[error("output stream not found: {0}")]
    StreamNotFound(RunToken),
    #[error("run token collision: {0}")]
    TokenCollision(RunToken),
    #[error("launch failed: {0}")]
    Launch(LaunchError),
}

pub type Result<T> = std::result::Result<T, RunError>;

impl From<LaunchError> for RunError {
    fn from(err: LaunchError) -> Self {
        match err {
            LaunchError::InvalidParams(e) => Self::InvalidRequest(e.to_string()),
            LaunchError::EmptyCredential(identity) => Self::CredentialMissing(identity),
            LaunchError::ToolNotFound(tool) => Self::ToolNotFound(tool),
            LaunchError::ScriptGenerationFailed { exit_code, output } => {
                Self::ScriptGenerationFailed { exit_code, output }
            }
            LaunchError::GenerationTimedOut(secs) => Self::GenerationTimedOut(secs),
            other => Self::Launch(other),
        }
    }
}

impl From<RegistryError> for RunError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::StreamNotFound(token) => Self::StreamNotFound(token),
            RegistryError::DuplicateToken(token) => Self::TokenCollision(token),
        }
    }
}

impl From<CredentialError> for RunError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Missing(identity) => Self::CredentialMissing(identity),
        }
    }
}

/// A caller's request to start a migration.
#[derive(Clone)]
pub struct RunRequest {
    pub credentials: Arc<dyn CredentialProvider>,
    pub params: RunParams,
}

impl RunRequest {
    pub fn new(credentials: Arc<dyn CredentialProvider>, params: RunParams) -> Self {
        Self {
            credentials,
            params,
        }
    }
}

impl std::fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRequest")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct RunCoordinator {
    gate: AdmissionGate,
    launcher: Launcher,
    registry: OutputRegistry,
}

impl RunCoordinator {
    pub fn new(config: Config) -> Self {
        Self {
            gate: AdmissionGate::new(),
            launcher: Launcher::new(config),
            registry: OutputRegistry::new(),
        }
    }

    pub fn config(&self) -> &Config {
        self.launcher.config()
    }

    /// Start a migration and return its ticket.
    ///
    /// Returns as soon as the long-running stage has been spawned and its
    /// output is being collected. Fails with `AdmissionDenied` without
    /// waiting if another run is in spawn setup.
    pub async fn run(&self, request: RunRequest) -> Result<RunTicket> {
        let RunRequest {
            credentials,
            params,
        } = request;

        params
            .validate()
            .map_err(|e| RunError::InvalidRequest(e.to_string()))?;
        let source_token = credentials.access_token(Identity::Source)?;
        let target_token = credentials.access_token(Identity::Target)?;

        let Some(permit) = self.gate.try_acquire() else {
            warn!(
                source_org = %params.source_org,
                target_org = %params.target_org,
                "run rejected: admission gate held"
            );
            return Err(RunError::AdmissionDenied);
        };

        let launched = self
            .launcher
            .spawn(&params, &source_token, &target_token)
            .await?;
        let mode = launched.mode;

        let token = RunToken::generate();
        let (tx, rx) = mpsc::channel(self.launcher.config().output_buffer);
        self.registry.put(token.clone(), rx).await?;
        collector::start(token.clone(), launched, tx);

        permit.release();

        info!(
            token = %token,
            mode = mode.as_str(),
            source_org = %params.source_org,
            target_org = %params.target_org,
            "run started"
        );

        Ok(RunTicket {
            token,
            mode,
            started_at: Utc::now(),
        })
    }

    /// Drain the output currently buffered for `token`.
    pub async fn output(&self, token: &RunToken) -> Result<OutputChunk> {
        Ok(self.registry.poll(token).await?)
    }

    /// Which identities `credentials` can supply a token for.
    pub fn authenticated(&self, credentials: &dyn CredentialProvider) -> CredentialStatus {
        credentials.status()
    }

    /// Whether a run currently holds the admission gate.
    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    /// Number of output streams not yet fully consumed.
    pub async fn stream_count(&self) -> usize {
        self.registry.len().await
    }
}
