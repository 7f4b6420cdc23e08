//! HTTP client for the migratord daemon.

use std::time::Duration;

use migrator_core::{CredentialStatus, OutputChunk, RunParams, RunTicket};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use thiserror::Error;

/// Request header carrying the caller's source token.
pub const SOURCE_TOKEN_HEADER: &str = "x-source-token";
/// Request header carrying the caller's target token.
pub const TARGET_TOKEN_HEADER: &str = "x-target-token";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running at {addr}\n  → start with: migratord\n  → or set MIGRATORD_ADDR if using a different address")]
    ConnectionFailed { addr: String },

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("output stream not found: {0}\n  → the run already finished and its output was collected, or the token is wrong")]
    StreamNotFound(String),

    #[error("unauthorized: {0}\n  → check MIGRATORD_TOKEN, GH_SOURCE_PAT and GH_PAT")]
    Unauthorized(String),

    #[error("another migration is starting, try again shortly")]
    AdmissionDenied,

    #[error("{message}")]
    ScriptGenerationFailed { message: String, output: Vec<String> },

    #[error(
        "daemon not ready after {timeout_ms}ms at {addr}\n  → ensure migratord is running\n  → check MIGRATORD_TOKEN if auth is enabled"
    )]
    DaemonNotReady { addr: String, timeout_ms: u64 },
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            let addr = e
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            ClientError::ConnectionFailed { addr }
        } else {
            ClientError::HttpError {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Error response from API.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub output: Vec<String>,
}

/// Response from the health endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub busy: bool,
    pub streams: usize,
}

/// Default total timeout for daemon readiness probe.
const DEFAULT_READY_TIMEOUT_MS: u64 = 5000;

/// Initial backoff delay for readiness probe.
const INITIAL_BACKOFF_MS: u64 = 200;

/// GitHub tokens forwarded with each request.
#[derive(Default, Clone)]
pub struct GithubTokens {
    pub source: Option<String>,
    pub target: Option<String>,
}

impl std::fmt::Debug for GithubTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubTokens")
            .field("source", &self.source.is_some())
            .field("target", &self.target.is_some())
            .finish()
    }
}

/// HTTP client for migratord.
#[derive(Debug)]
pub struct Client {
    base_url: String,
    token: Option<String>,
    github: GithubTokens,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str, token: Option<&str>, github: GithubTokens) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            github,
            http: reqwest::Client::new(),
        }
    }

    /// Returns the daemon address (for error messages).
    pub fn addr(&self) -> &str {
        &self.base_url
    }

    /// Check if daemon is healthy by probing /health endpoint.
    pub async fn check_health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        Ok(response.status().is_success())
    }

    /// Wait for daemon to become ready with exponential backoff.
    pub async fn wait_for_ready(&self) -> Result<()> {
        self.wait_for_ready_with_timeout(DEFAULT_READY_TIMEOUT_MS)
            .await
    }

    /// Wait for daemon to become ready with custom timeout.
    pub async fn wait_for_ready_with_timeout(&self, timeout_ms: u64) -> Result<()> {
        let start = std::time::Instant::now();
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            match self.check_health().await {
                Ok(true) => return Ok(()),
                Ok(false) | Err(_) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    if elapsed >= timeout_ms {
                        return Err(ClientError::DaemonNotReady {
                            addr: self.base_url.clone(),
                            timeout_ms,
                        });
                    }

                    eprintln!(
                        "waiting for daemon at {} (retrying in {}ms)",
                        self.base_url, backoff_ms
                    );

                    let remaining = timeout_ms.saturating_sub(elapsed);
                    let sleep_ms = backoff_ms.min(remaining);
                    tokio::time::sleep(Duration::from_millis(sleep_ms)).await;

                    backoff_ms = backoff_ms.saturating_mul(2);
                }
            }
        }
    }

    /// Build headers with optional auth and GitHub tokens.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        for (name, token) in [
            (SOURCE_TOKEN_HEADER, &self.github.source),
            (TARGET_TOKEN_HEADER, &self.github.target),
        ] {
            if let Some(value) = token.as_deref().and_then(|t| HeaderValue::from_str(t).ok()) {
                headers.insert(HeaderName::from_static(name), value);
            }
        }
        headers
    }

    /// Handle error response from API.
    async fn handle_error(&self, response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();
        let body = response.json::<ErrorResponse>().await.unwrap_or_default();
        error_from_status(status, body)
    }

    /// Daemon health.
    /// GET /health
    pub async fn health(&self) -> Result<HealthResponse> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// Which identities the daemon could authenticate for this caller.
    /// GET /credentials
    pub async fn credential_status(&self) -> Result<CredentialStatus> {
        let url = format!("{}/credentials", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// Start a migration.
    /// POST /runs
    pub async fn start_run(&self, params: &RunParams) -> Result<RunTicket> {
        let url = format!("{}/runs", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// Fetch the output produced since the last poll.
    /// GET /runs/{token}/output
    pub async fn poll_output(&self, token: &str) -> Result<OutputChunk> {
        let response = self
            .http
            .get(output_url(&self.base_url, token))
            .headers(self.headers())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// Poll until the run is done, handing each chunk to `on_chunk`.
    ///
    /// Returns the total number of lines received.
    pub async fn follow_output<F>(&self, token: &str, interval: Duration, mut on_chunk: F) -> Result<usize>
    where
        F: FnMut(&OutputChunk),
    {
        let mut total = 0;
        loop {
            let chunk = self.poll_output(token).await?;
            total += chunk.lines.len();
            on_chunk(&chunk);
            if chunk.done {
                return Ok(total);
            }
            // Keep draining without delay while lines are flowing.
            if chunk.lines.is_empty() {
                tokio::time::sleep(interval).await;
            }
        }
    }
}

fn output_url(base_url: &str, token: &str) -> String {
    format!("{}/runs/{}/output", base_url, urlencoding::encode(token))
}

fn error_from_status(status: u16, body: ErrorResponse) -> ClientError {
    let message = if body.error.is_empty() {
        "unknown error".to_string()
    } else {
        body.error
    };

    match status {
        400 => ClientError::InvalidRequest(message),
        401 => ClientError::Unauthorized(message),
        404 => ClientError::StreamNotFound(message),
        409 => ClientError::AdmissionDenied,
        422 => ClientError::ScriptGenerationFailed {
            message,
            output: body.output,
        },
        _ => ClientError::HttpError { status, message },
    }
}
