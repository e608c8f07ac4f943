//! Subprocess runner for external tools

use crate::toolkit::{ProcessOutput, ToolkitError};
use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs an external program to completion
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args`, optionally inside `cwd`
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<ProcessOutput, ToolkitError>;
}

/// Runs programs as child processes of this one
#[derive(Debug, Clone)]
pub struct SystemProcessRunner {
    /// Timeout for command execution in seconds
    timeout_secs: u64,
}

impl SystemProcessRunner {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    #[cfg(test)]
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    /// Spawn the program and capture its output
    ///
    /// # Errors
    /// Returns `ToolkitError` if:
    /// - The executable cannot be spawned
    /// - It exits with a non-zero status
    /// - The command times out
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<ProcessOutput, ToolkitError> {
        debug!("Spawning {} {:?}", program, args);

        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let result = timeout(Duration::from_secs(self.timeout_secs), command.output())
            .await
            .map_err(|_| ToolkitError::Timeout(self.timeout_secs))?;

        let output = result.map_err(|source| ToolkitError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        // Check exit code
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!("{} exited with code {}: {}", program, code, stderr.trim());
            return Err(ToolkitError::Exit {
                program: program.to_string(),
                code,
                stderr: stderr.trim().to_string(),
            });
        }

        let duration = started.elapsed();
        debug!("{} returned {} bytes of output in {:?}", program, stdout.len(), duration);

        Ok(ProcessOutput {
            stdout,
            stderr,
            duration,
        })
    }
}
