//! Computation response written to standard output

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The JSON result reported back to the orchestrator
///
/// `success` only signals that the process ran to completion; whether the
/// pipeline itself worked is carried in `output.message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationResponse {
    pub output: ResponseOutput,
    pub cache: Value,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseOutput {
    pub message: String,

    /// Path to the packaged results archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_outputs: Option<String>,

    /// Base64-encoded PNG preview
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl ComputationResponse {
    /// A message-only response, used for non-fatal failures
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            output: ResponseOutput {
                message: message.into(),
                download_outputs: None,
                display: None,
            },
            cache: Value::Object(Default::default()),
            success: true,
        }
    }

    /// A response for a finished pipeline run
    pub fn completed(
        message: impl Into<String>,
        download_outputs: Option<String>,
        display: Option<String>,
    ) -> Self {
        let mut response = Self::message(message);
        response.output.download_outputs = download_outputs;
        response.output.display = display;
        response
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
