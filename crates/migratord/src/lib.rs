//! migratord - migration runner daemon
//!
//! Starts the external migration tool on request and serves its output to
//! pollers through opaque run tokens.

pub mod admission;
pub mod collector;
pub mod coordinator;
pub mod credentials;
pub mod launcher;
pub mod registry;
pub mod server;

use std::sync::Arc;

use coordinator::RunCoordinator;
use credentials::{CredentialProvider, CredentialSet};
use eyre::WrapErr;
use migrator_core::{Config, Identity};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Environment variable holding the optional API bearer token.
pub const AUTH_TOKEN_ENV: &str = "MIGRATORD_AUTH_TOKEN";

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// HTTP server port (default: 8080).
    pub port: u16,
    /// Auth token for the HTTP API (optional).
    pub auth_token: Option<String>,
    /// Tool and run settings.
    pub config: Config,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: std::env::var(AUTH_TOKEN_ENV)
                .ok()
                .filter(|t| !t.trim().is_empty()),
            config: Config::default(),
        }
    }
}

/// Daemon state.
#[derive(Debug)]
pub struct Daemon {
    config: DaemonConfig,
    coordinator: Arc<RunCoordinator>,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Create a new daemon with the given configuration.
    pub fn new(config: DaemonConfig) -> eyre::Result<Self> {
        std::fs::create_dir_all(&config.config.work_root).wrap_err_with(|| {
            format!(
                "failed to create work root {}",
                config.config.work_root.display()
            )
        })?;

        let coordinator = Arc::new(RunCoordinator::new(config.config.clone()));
        Ok(Self {
            config,
            coordinator,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn coordinator(&self) -> &Arc<RunCoordinator> {
        &self.coordinator
    }

    /// Token cancelled when the daemon should stop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve the HTTP API until shutdown.
    pub async fn run(&self) -> eyre::Result<()> {
        let tool = &self.config.config;
        info!("migratord starting on port {}", self.config.port);
        info!(
            "tool: {} {}",
            tool.tool_bin.display(),
            tool.tool_args.join(" ")
        );
        info!("work root: {}", tool.work_root.display());
        if self.config.auth_token.is_some() {
            info!("auth token: enabled");
        }

        let fallback = CredentialSet::from_env();
        for identity in [Identity::Source, Identity::Target] {
            if !fallback.authenticated(identity) {
                warn!(
                    identity = identity.as_str(),
                    "no fallback credential in environment; requests must supply one"
                );
            }
        }

        server::start_server(
            Arc::clone(&self.coordinator),
            self.config.port,
            self.config.auth_token.clone(),
            fallback,
            self.shutdown.clone(),
        )
        .await
        .map_err(|e| eyre::eyre!("HTTP server error: {e}"))?;

        info!("migratord stopped");
        Ok(())
    }

    /// Signal the daemon to stop. Running migrations are left alone.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
