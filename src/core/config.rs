//! Adapter configuration: toolkit paths, templates and output names
//!
//! Every key is optional in the YAML file; missing keys fall back to the
//! values of the standard SPM12 standalone container.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable that points at a configuration file
pub const CONFIG_ENV_VAR: &str = "FMRI_ADAPTER_CONFIG";

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Adapter configuration loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Toolkit version the adapter was built against, e.g. "12.7169"
    pub spm_version: String,

    /// Command that runs a MATLAB script through the SPM standalone.
    /// The script path is appended as the last argument.
    pub matlab_cmd: String,

    /// Root of the SPM standalone install
    pub spm_path: PathBuf,

    /// Tissue probability map used for segmentation and normalisation.
    /// A relative path is taken from `spm_path`.
    pub tpm_path: PathBuf,

    /// Where the reorientation matrix is written for provenance
    pub transf_mat_path: PathBuf,

    /// BIDS suffix of the functional scans accepted by the pipeline
    pub scan_type: String,

    pub fmri_output_dirname: String,
    pub output_zip_dir: String,
    pub display_image_name: String,

    /// Filename prefix of normalised images used for display
    pub display_nifti: String,

    /// Filename prefix of the normalised slice-timed images
    pub qc_nifti: String,

    pub fmri_qc_filename: String,
    pub outputs_manual_name: String,
    pub qc_readme_name: String,

    /// Voxel-space cut coordinates for the display image
    pub cut_coords: [i64; 3],

    pub bids_validator_cmd: String,
    pub dicom_converter_cmd: String,

    /// Timeout for one toolkit invocation in seconds
    pub toolkit_timeout_secs: u64,

    /// Timeout for auxiliary tools (validator, converter) in seconds
    pub tool_timeout_secs: u64,

    /// Refuse to run when the toolkit reports a different version
    pub verify_toolkit_version: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            spm_version: "12.7169".to_string(),
            matlab_cmd: "/opt/spm12/run_spm12.sh /opt/mcr/v92 script".to_string(),
            spm_path: PathBuf::from("/opt/spm12/fsroot"),
            tpm_path: PathBuf::from("/opt/spm12/fsroot/spm/spm12/tpm/TPM.nii"),
            transf_mat_path: PathBuf::from("/computation/transform.mat"),
            scan_type: "bold".to_string(),
            fmri_output_dirname: "fmri_spm12".to_string(),
            output_zip_dir: "fmri_outputs".to_string(),
            display_image_name: "wa.png".to_string(),
            display_nifti: "w".to_string(),
            qc_nifti: "wa".to_string(),
            fmri_qc_filename: "QC_Framewise_displacement.txt".to_string(),
            outputs_manual_name: "outputs_description.txt".to_string(),
            qc_readme_name: "quality_control_readme.txt".to_string(),
            cut_coords: [0, 0, 0],
            bids_validator_cmd: "bids-validator".to_string(),
            dicom_converter_cmd: "dcm2niix".to_string(),
            toolkit_timeout_secs: 21600,
            tool_timeout_secs: 600,
            verify_toolkit_version: true,
        }
    }
}

impl AdapterConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document is a valid "all defaults" file
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: AdapterConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve configuration: explicit path, then the environment
    /// variable, then the per-user config file, then built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            info!("Loading config from {}", path.display());
            return Self::from_file(path);
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            info!("Loading config from ${} ({})", CONFIG_ENV_VAR, path.display());
            return Self::from_file(path);
        }

        if let Some(path) = Self::default_path().filter(|p| p.is_file()) {
            info!("Loading config from {}", path.display());
            return Self::from_file(path);
        }

        debug!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Per-user configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fmri-preprocess").join("config.yaml"))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.matlab_cmd.split_whitespace().next().is_none() {
            return Err(ConfigError::Invalid("matlab_cmd must not be empty".to_string()));
        }
        if self.bids_validator_cmd.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "bids_validator_cmd must not be empty".to_string(),
            ));
        }
        if self.dicom_converter_cmd.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "dicom_converter_cmd must not be empty".to_string(),
            ));
        }
        if self.toolkit_timeout_secs == 0 || self.tool_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        for (name, value) in [
            ("fmri_output_dirname", &self.fmri_output_dirname),
            ("output_zip_dir", &self.output_zip_dir),
            ("fmri_qc_filename", &self.fmri_qc_filename),
        ] {
            if value.is_empty() || value.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a plain file name, got '{}'",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Default normalisation template, resolved against `spm_path`
    pub fn template_path(&self) -> PathBuf {
        if self.tpm_path.is_absolute() {
            self.tpm_path.clone()
        } else {
            self.spm_path.join(&self.tpm_path)
        }
    }

    /// Split `matlab_cmd` into program and leading arguments
    pub fn toolkit_command(&self) -> (String, Vec<String>) {
        let mut parts = self.matlab_cmd.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        (program, parts.collect())
    }
}
