//! Test-server port allocation state.
//!
//! Tests that spawn host-side helper servers claim ports from a shared range.
//! The allocation cursor is process-wide state persisted on disk so shard
//! runners in child processes see the same cursor. The dispatcher resets it
//! exactly once per dispatch, before any shard executes; resetting mid-run
//! would hand two shards the same port range.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Result type for port-allocator operations.
pub type PortResult<T> = Result<T, PortError>;

/// Errors from the port allocator. All of them are fatal for the dispatch.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("failed to write port allocation state to {path}: {source}")]
    StateWrite {
        path: String,
        source: std::io::Error,
    },

    #[error("port allocation error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Resets shared port-allocation state.
///
/// Modeled as an explicitly passed service rather than an implicit global so
/// tests can inject a fake and the reset-once lifecycle stays visible at the
/// dispatch call site.
#[async_trait]
pub trait PortAllocator: Send + Sync {
    /// Rewinds the allocation cursor to the start of the range.
    ///
    /// Must succeed before any shard executes or the run aborts.
    async fn reset_allocation(&self) -> PortResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PortState {
    next_port: u16,
    last_port: u16,
}

/// Port allocator backed by a JSON state file.
pub struct FilePortAllocator {
    state_path: PathBuf,
    first_port: u16,
    last_port: u16,
}

impl FilePortAllocator {
    /// Default range for test-server helper ports.
    pub const DEFAULT_RANGE: (u16, u16) = (30000, 30999);

    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self::with_range(state_path, Self::DEFAULT_RANGE.0, Self::DEFAULT_RANGE.1)
    }

    pub fn with_range(state_path: impl Into<PathBuf>, first_port: u16, last_port: u16) -> Self {
        Self {
            state_path: state_path.into(),
            first_port,
            last_port,
        }
    }
}

#[async_trait]
impl PortAllocator for FilePortAllocator {
    async fn reset_allocation(&self) -> PortResult<()> {
        let state = PortState {
            next_port: self.first_port,
            last_port: self.last_port,
        };
        // Infallible: the struct has no map keys or non-string keys.
        let body = serde_json::to_vec(&state).expect("port state must serialize");

        if let Some(parent) = self.state_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| PortError::StateWrite {
                    path: self.state_path.display().to_string(),
                    source,
                })?;
        }
        tokio::fs::write(&self.state_path, body)
            .await
            .map_err(|source| PortError::StateWrite {
                path: self.state_path.display().to_string(),
                source,
            })?;

        info!(
            "Reset test server port allocation to {}-{}",
            self.first_port, self.last_port
        );
        Ok(())
    }
}
