//! Toolkit client configuration

use crate::core::AdapterConfig;

/// Configuration for the SPM standalone client
#[derive(Debug, Clone)]
pub struct ToolkitClientConfig {
    /// Launcher executable, e.g. `run_spm12.sh`
    pub program: String,

    /// Arguments placed before the script path
    pub args: Vec<String>,

    /// Timeout for one invocation in seconds
    pub timeout_secs: u64,

    /// Version the toolkit must report
    pub expected_version: String,
}

impl Default for ToolkitClientConfig {
    fn default() -> Self {
        Self::from_adapter_config(&AdapterConfig::default())
    }
}

impl ToolkitClientConfig {
    pub fn from_adapter_config(config: &AdapterConfig) -> Self {
        let (program, args) = config.toolkit_command();
        Self {
            program,
            args,
            timeout_secs: config.toolkit_timeout_secs,
            expected_version: config.spm_version.clone(),
        }
    }

    #[allow(dead_code)]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self.args.clear();
        self
    }

    #[allow(dead_code)]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}
