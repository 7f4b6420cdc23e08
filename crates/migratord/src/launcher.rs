//! Process launcher for the external migration tool.
//!
//! Key responsibilities:
//! - Create an isolated working directory per run
//! - Build a restricted child environment (inherited basics + credentials)
//! - Bulk mode: run `generate-script`, mark the script executable, start it
//! - Single-repo mode: start `migrate-repo` directly

use migrator_core::{Config, Identity, ParamsError, RunMode, RunParams};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Variables the tool reads the source token from.
pub const SOURCE_TOKEN_VARS: &[&str] = &["GH_SOURCE_PAT"];

/// Variables the tool (and its `gh` host) read the target token from.
pub const TARGET_TOKEN_VARS: &[&str] = &["GH_PAT", "GH_TOKEN"];

/// Variable carrying the alternate API base URL, when one is set.
pub const GHES_API_URL_VAR: &str = "GHES_API_URL";

/// Maximum bytes of script-generation output kept for diagnostics.
const MAX_GENERATE_OUTPUT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("invalid run parameters: {0}")]
    InvalidParams(#[from] ParamsError),
    #[error("empty {0} credential")]
    EmptyCredential(Identity),
    #[error("migration tool not found: {0}")]
    ToolNotFound(String),
    #[error("script generation failed (exit code {})", .exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    ScriptGenerationFailed {
        exit_code: Option<i32>,
        output: Vec<String>,
    },
    #[error("script generation timed out after {0} seconds")]
    GenerationTimedOut(u32),
    #[error("generated script not found at {0}")]
    ScriptMissing(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LaunchError>;

/// A started long-running stage.
///
/// `workdir` must outlive `child`: in bulk mode the running script lives in it.
#[derive(Debug)]
pub struct LaunchedProcess {
    pub child: Child,
    pub mode: RunMode,
    pub workdir: TempDir,
}

/// Starts the migration tool chain for a run.
#[derive(Debug, Clone)]
pub struct Launcher {
    config: Config,
}

impl Launcher {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start the tool chain for `params`.
    ///
    /// Returns once the long-running stage has been spawned. Script
    /// generation runs to completion inside this call.
    pub async fn spawn(
        &self,
        params: &RunParams,
        source_token: &str,
        target_token: &str,
    ) -> Result<LaunchedProcess> {
        params.validate()?;
        if source_token.trim().is_empty() {
            return Err(LaunchError::EmptyCredential(Identity::Source));
        }
        if target_token.trim().is_empty() {
            return Err(LaunchError::EmptyCredential(Identity::Target));
        }

        std::fs::create_dir_all(&self.config.work_root)?;
        let workdir = tempfile::Builder::new()
            .prefix("migration-")
            .tempdir_in(&self.config.work_root)?;

        let ghes_api_url = self.ghes_api_url(params);
        let env = self.child_env(source_token, target_token, ghes_api_url);
        let mode = params.mode();

        let child = match params.repo() {
            None => {
                let script = self
                    .generate_script(params, ghes_api_url, &env, workdir.path())
                    .await?;
                make_executable(&script).await?;

                info!(
                    source_org = %params.source_org,
                    target_org = %params.target_org,
                    script = %script.display(),
                    "starting generated migration script"
                );
                let mut cmd = Command::new(&script);
                configure(&mut cmd, &env, workdir.path());
                cmd.spawn()?
            }
            Some(repo) => {
                let args = migrate_repo_args(params, repo, ghes_api_url);
                info!(
                    source_org = %params.source_org,
                    source_repo = %repo,
                    target_org = %params.target_org,
                    "starting single repository migration"
                );
                let mut cmd = self.tool_command(&args, &env, workdir.path());
                cmd.spawn().map_err(|e| self.spawn_error(e))?
            }
        };

        Ok(LaunchedProcess {
            child,
            mode,
            workdir,
        })
    }

    /// The per-request override wins over the configured default.
    fn ghes_api_url<'a>(&'a self, params: &'a RunParams) -> Option<&'a str> {
        params
            .ghes_api_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .or(self.config.ghes_api_url.as_deref())
    }

    /// The complete child environment. Nothing else from the daemon's own
    /// environment reaches the child.
    pub fn child_env(
        &self,
        source_token: &str,
        target_token: &str,
        ghes_api_url: Option<&str>,
    ) -> Vec<(OsString, OsString)> {
        let mut env: Vec<(OsString, OsString)> = self
            .config
            .inherit_env
            .iter()
            .filter_map(|name| std::env::var_os(name).map(|v| (OsString::from(name), v)))
            .collect();

        for name in SOURCE_TOKEN_VARS {
            env.push((name.into(), source_token.into()));
        }
        for name in TARGET_TOKEN_VARS {
            env.push((name.into(), target_token.into()));
        }
        if let Some(url) = ghes_api_url {
            env.push((GHES_API_URL_VAR.into(), url.into()));
        }
        env
    }

    fn tool_command(
        &self,
        args: &[String],
        env: &[(OsString, OsString)],
        workdir: &Path,
    ) -> Command {
        let mut cmd = Command::new(&self.config.tool_bin);
        cmd.args(&self.config.tool_args).args(args);
        configure(&mut cmd, env, workdir);
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> LaunchError {
        if e.kind() == std::io::ErrorKind::NotFound {
            LaunchError::ToolNotFound(self.config.tool_bin.display().to_string())
        } else {
            LaunchError::Io(e)
        }
    }

    /// Run `generate-script` to completion and return the script path.
    async fn generate_script(
        &self,
        params: &RunParams,
        ghes_api_url: Option<&str>,
        env: &[(OsString, OsString)],
        workdir: &Path,
    ) -> Result<PathBuf> {
        let script = workdir.join(&self.config.script_name);
        let args = generate_script_args(params, &script, ghes_api_url);

        info!(
            source_org = %params.source_org,
            target_org = %params.target_org,
            workdir = %workdir.display(),
            "generating migration script"
        );
        debug!(tool = %self.config.tool_bin.display(), args = ?args, "spawning script generator");

        let mut cmd = self.tool_command(&args, env, workdir);
        cmd.kill_on_drop(true);
        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;

        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(read_bounded(stdout, MAX_GENERATE_OUTPUT_BYTES)));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_bounded(stderr, MAX_GENERATE_OUTPUT_BYTES)));

        let started = Instant::now();
        let status = if self.config.generate_timeout_sec > 0 {
            let limit = Duration::from_secs(u64::from(self.config.generate_timeout_sec));
            match timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(
                        timeout_sec = self.config.generate_timeout_sec,
                        "script generation timed out; killing"
                    );
                    if let Err(err) = child.kill().await {
                        warn!(error = %err, "failed to kill script generator");
                    }
                    return Err(LaunchError::GenerationTimedOut(
                        self.config.generate_timeout_sec,
                    ));
                }
            }
        } else {
            child.wait().await?
        };

        let mut output = collect_lines(stdout_task).await;
        output.extend(collect_lines(stderr_task).await);

        let elapsed_ms = started.elapsed().as_millis();
        if !status.success() {
            warn!(
                exit_code = ?status.code(),
                elapsed_ms = elapsed_ms,
                output_lines = output.len(),
                "script generation failed"
            );
            return Err(LaunchError::ScriptGenerationFailed {
                exit_code: status.code(),
                output,
            });
        }

        info!(elapsed_ms = elapsed_ms, "script generation complete");

        if !script.is_file() {
            return Err(LaunchError::ScriptMissing(script));
        }
        Ok(script)
    }
}

fn configure(cmd: &mut Command, env: &[(OsString, OsString)], workdir: &Path) {
    cmd.env_clear()
        .envs(env.iter().map(|(k, v)| (k, v)))
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
}

fn generate_script_args(
    params: &RunParams,
    script: &Path,
    ghes_api_url: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "generate-script".to_string(),
        "--github-source-org".to_string(),
        params.source_org.clone(),
        "--github-target-org".to_string(),
        params.target_org.clone(),
        "--output".to_string(),
        script.display().to_string(),
    ];
    if let Some(url) = ghes_api_url {
        args.push("--ghes-api-url".to_string());
        args.push(url.to_string());
    }
    args
}

fn migrate_repo_args(params: &RunParams, repo: &str, ghes_api_url: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "migrate-repo".to_string(),
        "--source-repo".to_string(),
        repo.to_string(),
        "--github-source-org".to_string(),
        params.source_org.clone(),
        "--github-target-org".to_string(),
        params.target_org.clone(),
    ];
    if let Some(url) = ghes_api_url {
        args.push("--ghes-api-url".to_string());
        args.push(url.to_string());
    }
    args
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    tokio::fs::set_permissions(path, perms).await
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Read from an async reader with a maximum byte limit, draining the rest.
async fn read_bounded<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        let remaining = max_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            warn!(max_bytes, "script generation output exceeded limit, truncating");
            while reader.read(&mut chunk).await? > 0 {}
            break;
        }

        let to_take = n.min(remaining);
        buf.extend_from_slice(&chunk[..to_take]);
    }

    Ok(buf)
}

async fn collect_lines(
    task: Option<tokio::task::JoinHandle<std::io::Result<Vec<u8>>>>,
) -> Vec<String> {
    let Some(task) = task else {
        return Vec::new();
    };
    match task.await {
        Ok(Ok(buf)) => String::from_utf8_lossy(&buf)
            .lines()
            .map(String::from)
            .collect(),
        Ok(Err(err)) => {
            warn!(error = %err, "script generation output capture failed");
            Vec::new()
        }
        Err(err) => {
            warn!(error = %err, "script generation output task panicked");
            Vec::new()
        }
    }
}
