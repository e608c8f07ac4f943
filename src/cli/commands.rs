//! CLI command definitions

use clap::Args;
use serde_json::{Map, Value};

/// Run the pipeline
#[derive(Debug, Args, Clone, Default)]
pub struct RunCommand {
    /// Computation request as JSON; read from stdin when omitted
    pub request: Option<String>,

    /// Skip the toolkit version check
    #[arg(long)]
    pub skip_version_check: bool,
}

/// Check the toolkit installation
#[derive(Debug, Args, Clone)]
pub struct CheckCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show resolved pipeline options
#[derive(Debug, Args, Clone)]
pub struct OptionsCommand {
    /// Option overrides as a JSON object
    #[arg(value_parser = parse_json_object)]
    pub overrides: Option<Map<String, Value>>,
}

/// Parse a JSON object argument
pub fn parse_json_object(s: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(s) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", other)),
        Err(e) => Err(format!("invalid JSON: {}", e)),
    }
}
