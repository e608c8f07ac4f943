//! Computation request read from standard input

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

/// The JSON task description sent by the orchestrator
#[derive(Debug, Clone, Deserialize)]
pub struct ComputationRequest {
    pub state: RequestState,

    #[serde(default)]
    pub input: RequestInput,

    /// Opaque cache carried between invocations (unused by this adapter)
    #[serde(default)]
    pub cache: Value,
}

/// Directories assigned by the orchestrator
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestState {
    /// Where input data lives
    pub base_directory: PathBuf,

    /// Where outputs must be written
    pub output_directory: PathBuf,
}

/// Caller-supplied input description
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestInput {
    /// Data root or explicit list of NIfTI files
    #[serde(default)]
    pub data: Option<DataSpec>,

    /// Pipeline option overrides
    #[serde(default, alias = "opts")]
    pub options: Option<Map<String, Value>>,
}

/// Either a single path or a list of paths
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DataSpec {
    Path(PathBuf),
    Paths(Vec<PathBuf>),
}

impl ComputationRequest {
    /// Parse a request from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Option overrides, empty when none were given
    pub fn option_overrides(&self) -> Map<String, Value> {
        self.input.options.clone().unwrap_or_default()
    }

    /// Directory the data lives in: `input.data` when it names a path,
    /// otherwise the base directory
    pub fn data_root(&self) -> PathBuf {
        match &self.input.data {
            Some(DataSpec::Path(path)) if !path.as_os_str().is_empty() => {
                if path.is_absolute() {
                    path.clone()
                } else {
                    self.state.base_directory.join(path)
                }
            }
            _ => self.state.base_directory.clone(),
        }
    }

    pub fn write_dir(&self) -> &PathBuf {
        &self.state.output_directory
    }
}
