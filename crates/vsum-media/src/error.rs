//! Error types for media operations.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while running an external tool.
///
/// A tool that runs and exits non-zero is not an error at this level; it is
/// reported through [`crate::StageOutput::success`]. Spawn failures and
/// timeouts are kept apart so callers and tests can tell them from each other.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {limit:?}")]
    Timeout { program: String, limit: Duration },

    #[error("Working directory not found: {0}")]
    WorkingDirNotFound(PathBuf),

    #[error("Page details request failed: {0}")]
    DetailsFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Create a spawn failure error.
    pub fn spawn_failed(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            program: program.into(),
            source,
        }
    }

    /// Create a timeout error.
    pub fn timeout(program: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            program: program.into(),
            limit,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MediaError::Timeout { .. })
    }

    /// The tool could not be started at all.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(
            self,
            MediaError::SpawnFailed { .. } | MediaError::ToolNotFound(_)
        )
    }
}
