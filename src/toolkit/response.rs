//! Toolkit process results and errors

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Error types for external process invocations
#[derive(Debug, Error)]
pub enum ToolkitError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code}: {stderr}")]
    Exit {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("timeout after {0} seconds")]
    Timeout(u64),

    #[error("toolkit version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("could not read toolkit version from output: {0}")]
    UnparseableVersion(String),

    #[error("failed to write script {path}: {source}")]
    Script {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ToolkitError {
    /// Whether the program could not be found or started at all
    pub fn is_missing_program(&self) -> bool {
        matches!(
            self,
            ToolkitError::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

/// Captured output of a finished process
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
        }
    }
}
