//! External toolkit invocation
//!
//! SPM12 runs as a standalone MATLAB-runtime executable that accepts a
//! script path. This module renders the scripts and runs them as
//! subprocesses; nothing here performs image processing itself.

pub mod batch;
pub mod client;
pub mod response;
pub mod subprocess_client;

use async_trait::async_trait;
pub use batch::{BatchJob, BatchScript, SliceTimingParams};
pub use client::ToolkitClientConfig;
pub use response::{ProcessOutput, ToolkitError};
pub use subprocess_client::{ProcessRunner, SystemProcessRunner};

use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Trait for toolkit execution - allows for different implementations
#[async_trait]
pub trait ToolkitExecutor: Send + Sync {
    /// Report the installed toolkit version, e.g. "12.7169"
    async fn version(&self) -> Result<String, ToolkitError>;

    /// Run a batch script with `work_dir` as the working directory
    async fn run_batch(
        &self,
        script: &Path,
        work_dir: &Path,
    ) -> Result<ProcessOutput, ToolkitError>;
}

/// Check that the toolkit reports the expected version
pub async fn verify_version<T: ToolkitExecutor + ?Sized>(
    toolkit: &T,
    expected: &str,
) -> Result<String, ToolkitError> {
    let found = toolkit.version().await?;
    if found != expected {
        return Err(ToolkitError::VersionMismatch {
            expected: expected.to_string(),
            found,
        });
    }
    info!("Toolkit version {} verified", found);
    Ok(found)
}

/// Extract the version printed by the probe script
pub fn parse_version(output: &str) -> Result<String, ToolkitError> {
    let pattern = Regex::new(r"SPM_VERSION=(\S+)").expect("version pattern is valid");
    pattern
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ToolkitError::UnparseableVersion(output.trim().to_string()))
}

/// SPM12 standalone client that runs scripts through the MATLAB runtime
#[derive(Debug, Clone)]
pub struct SpmStandaloneClient {
    config: ToolkitClientConfig,
    runner: SystemProcessRunner,
    /// Where probe scripts are written
    scratch_dir: PathBuf,
}

impl SpmStandaloneClient {
    pub fn new(config: ToolkitClientConfig) -> Self {
        let runner = SystemProcessRunner::new(config.timeout_secs);
        Self {
            config,
            runner,
            scratch_dir: std::env::temp_dir(),
        }
    }

    #[allow(dead_code)]
    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = dir;
        self
    }

    pub fn config(&self) -> &ToolkitClientConfig {
        &self.config
    }

    fn command_args(&self, script: &Path) -> Vec<String> {
        let mut args = self.config.args.clone();
        args.push(script.display().to_string());
        args
    }
}

#[async_trait]
impl ToolkitExecutor for SpmStandaloneClient {
    async fn version(&self) -> Result<String, ToolkitError> {
        let script = self
            .scratch_dir
            .join(format!("spm_version_{}.m", uuid::Uuid::new_v4().simple()));
        BatchScript::version_probe().write_to(&script)?;

        let result = self
            .runner
            .run(&self.config.program, &self.command_args(&script), Some(&self.scratch_dir))
            .await;
        let _ = std::fs::remove_file(&script);

        let output = result?;
        debug!("Toolkit version probe output: {}", output.stdout.trim());
        parse_version(&output.stdout)
    }

    async fn run_batch(
        &self,
        script: &Path,
        work_dir: &Path,
    ) -> Result<ProcessOutput, ToolkitError> {
        info!("Running toolkit batch {}", script.display());
        let output = self
            .runner
            .run(&self.config.program, &self.command_args(script), Some(work_dir))
            .await?;
        info!("Toolkit batch finished in {:.1?}", output.duration);
        debug!("Toolkit stdout: {}", output.stdout.trim());
        if !output.stderr.trim().is_empty() {
            debug!("Toolkit stderr: {}", output.stderr.trim());
        }
        Ok(output)
    }
}
