//! Output collection for a running migration.
//!
//! Two drain tasks (stdout, stderr) feed one bounded channel. A supervisor
//! waits for the process to exit and for both drains to finish, then drops
//! the last sender; the closed channel is the only completion signal.
//!
//! Lines are never dropped. When the channel is full the drains wait, which
//! in turn throttles the child through its own pipes.

use std::time::Instant;

use migrator_core::{RunMode, RunToken};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::launcher::LaunchedProcess;

/// Which pipe a drain task reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipe {
    Stdout,
    Stderr,
}

impl Pipe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Finite, non-restartable sequence of text lines from one pipe.
///
/// Splits on `\n`, strips a trailing `\r`, and decodes lossily so a stray
/// invalid byte does not end the stream.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::with_capacity(256),
            finished: false,
        }
    }

    /// Next line, or `None` at end of stream. After an error or end of
    /// stream every later call returns `None`.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        if self.finished {
            return Ok(None);
        }
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) => {
                self.finished = true;
                Ok(None)
            }
            Ok(_) => Ok(Some(decode_line(&self.buf))),
            Err(err) => {
                self.finished = true;
                Err(err)
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Forward every line from `reader` into `tx`. Returns the number of lines
/// read.
///
/// If the receiving side is gone the pipe is still drained to the end so
/// the child never blocks on a full pipe.
pub async fn drain<R: AsyncRead + Unpin>(
    reader: R,
    tx: mpsc::Sender<String>,
    pipe: Pipe,
    token: &RunToken,
) -> usize {
    let mut lines = LineReader::new(reader);
    let mut count = 0usize;
    let mut receiver_gone = false;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                count += 1;
                if receiver_gone {
                    continue;
                }
                if tx.send(line).await.is_err() {
                    debug!(token = %token, pipe = pipe.as_str(), "output receiver dropped; discarding remaining lines");
                    receiver_gone = true;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(token = %token, pipe = pipe.as_str(), error = %err, "pipe read failed");
                break;
            }
        }
    }

    count
}

/// What the supervisor observed once the run was fully drained.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout_lines: usize,
    pub stderr_lines: usize,
    pub duration_ms: u64,
}

/// Start the drain tasks and the supervisor for a launched process.
///
/// The returned handle resolves after the channel has been closed.
pub fn start(
    token: RunToken,
    launched: LaunchedProcess,
    tx: mpsc::Sender<String>,
) -> JoinHandle<RunSummary> {
    let LaunchedProcess {
        mut child,
        mode,
        workdir,
    } = launched;

    let stdout_task = child.stdout.take().map(|stdout| {
        let tx = tx.clone();
        let token = token.clone();
        tokio::spawn(async move { drain(stdout, tx, Pipe::Stdout, &token).await })
    });
    let stderr_task = child.stderr.take().map(|stderr| {
        let tx = tx.clone();
        let token = token.clone();
        tokio::spawn(async move { drain(stderr, tx, Pipe::Stderr, &token).await })
    });

    tokio::spawn(async move {
        let started = Instant::now();

        let status = child.wait().await;

        let stdout_lines = join_drain(stdout_task, Pipe::Stdout, &token).await;
        let stderr_lines = join_drain(stderr_task, Pipe::Stderr, &token).await;

        drop(workdir);
        // Last sender: dropping it closes the stream.
        drop(tx);

        let duration_ms = started.elapsed().as_millis() as u64;
        let summary = match status {
            Ok(status) => RunSummary {
                exit_code: status.code(),
                success: status.success(),
                stdout_lines,
                stderr_lines,
                duration_ms,
            },
            Err(err) => {
                warn!(token = %token, error = %err, "failed to wait for migration process");
                RunSummary {
                    exit_code: None,
                    success: false,
                    stdout_lines,
                    stderr_lines,
                    duration_ms,
                }
            }
        };

        log_summary(&token, mode, &summary);
        summary
    })
}

async fn join_drain(task: Option<JoinHandle<usize>>, pipe: Pipe, token: &RunToken) -> usize {
    let Some(task) = task else {
        return 0;
    };
    match task.await {
        Ok(count) => count,
        Err(err) => {
            warn!(token = %token, pipe = pipe.as_str(), error = %err, "drain task panicked");
            0
        }
    }
}

fn log_summary(token: &RunToken, mode: RunMode, summary: &RunSummary) {
    if summary.success {
        info!(
            token = %token,
            mode = mode.as_str(),
            exit_code = ?summary.exit_code,
            duration_ms = summary.duration_ms,
            stdout_lines = summary.stdout_lines,
            stderr_lines = summary.stderr_lines,
            "migration process finished"
        );
    } else {
        warn!(
            token = %token,
            mode = mode.as_str(),
            exit_code = ?summary.exit_code,
            duration_ms = summary.duration_ms,
            stdout_lines = summary.stdout_lines,
            stderr_lines = summary.stderr_lines,
            "migration process failed"
        );
    }
}
