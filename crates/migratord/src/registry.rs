//! Token-addressed output streams.
//!
//! Each live run owns one receiver in the map. A poll drains whatever is
//! buffered without waiting. The first poll that finds the channel closed
//! and empty reports `done` and removes the entry.

use std::collections::HashMap;

use migrator_core::{OutputChunk, RunToken};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("output stream not found: {0}")]
    StreamNotFound(RunToken),
    #[error("output stream already registered: {0}")]
    DuplicateToken(RunToken),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Default)]
pub struct OutputRegistry {
    streams: Mutex<HashMap<RunToken, mpsc::Receiver<String>>>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the receiving end of a run's output channel.
    pub async fn put(&self, token: RunToken, rx: mpsc::Receiver<String>) -> Result<()> {
        let mut streams = self.streams.lock().await;
        if streams.contains_key(&token) {
            return Err(RegistryError::DuplicateToken(token));
        }
        streams.insert(token, rx);
        Ok(())
    }

    /// Take every line available right now.
    ///
    /// `done` is true exactly once, on the poll that observes the closed,
    /// drained channel; later polls fail with `StreamNotFound`.
    pub async fn poll(&self, token: &RunToken) -> Result<OutputChunk> {
        let mut streams = self.streams.lock().await;
        let rx = streams
            .get_mut(token)
            .ok_or_else(|| RegistryError::StreamNotFound(token.clone()))?;

        let mut chunk = OutputChunk::default();
        loop {
            match rx.try_recv() {
                Ok(line) => chunk.lines.push(line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    chunk.done = true;
                    break;
                }
            }
        }

        if chunk.done {
            streams.remove(token);
        }
        Ok(chunk)
    }

    /// Number of live streams.
    pub async fn len(&self) -> usize {
        self.streams.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.streams.lock().await.is_empty()
    }
}
