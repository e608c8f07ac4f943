use anyhow::{Context, Result};
use fmri_preprocess::cli::commands::{CheckCommand, OptionsCommand, RunCommand};
use fmri_preprocess::cli::output::{style, EventRenderer, CHECK, CROSS, INFO};
use fmri_preprocess::cli::{Cli, Command};
use fmri_preprocess::core::{AdapterConfig, ComputationRequest, PipelineOptions};
use fmri_preprocess::execution::PipelineEngine;
use fmri_preprocess::toolkit::{
    self, SpmStandaloneClient, SystemProcessRunner, ToolkitClientConfig, ToolkitError,
        ToolkitExecutor,
};
use std::io::Read;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Logs go to stderr; stdout carries only the response
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = AdapterConfig::load(cli.config.as_deref())
        .context("Failed to load adapter configuration")?;
    debug!("Adapter configuration: {:?}", config);

    match cli.command() {
        Command::Run(cmd) => run_request(&cmd, config).await,
        Command::Check(cmd) => check_toolkit(&cmd, &config).await,
        Command::Options(cmd) => show_options(&cmd),
    }
}

async fn run_request(cmd: &RunCommand, config: AdapterConfig) -> Result<()> {
    let toolkit = SpmStandaloneClient::new(ToolkitClientConfig::from_adapter_config(&config));
    if config.verify_toolkit_version && !cmd.skip_version_check {
        toolkit::verify_version(&toolkit, &toolkit.config().expected_version)
            .await
            .context("SPM is unable to start")?;
    }

    let raw = match &cmd.request {
        Some(json) => json.clone(),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read request from stdin")?;
            buf
        }
    };
    let request = ComputationRequest::from_json(&raw).context("Malformed computation request")?;

    let runner = Arc::new(SystemProcessRunner::new(config.tool_timeout_secs));
    let mut engine = PipelineEngine::new(toolkit, runner, config);

    // Set up event handler for console output
    let renderer = EventRenderer::new();
    engine.add_event_handler(move |event| renderer.handle(&event));

    let response = engine.run(&request).await.context("Preprocessing aborted")?;
    println!("{}", response.to_json()?);
    Ok(())
}

async fn check_toolkit(cmd: &CheckCommand, config: &AdapterConfig) -> Result<()> {
    let toolkit = SpmStandaloneClient::new(ToolkitClientConfig::from_adapter_config(config));
    let found = toolkit.version().await.context("Failed to query SPM version")?;
    let matches = found == config.spm_version;

    if cmd.json {
        let report = serde_json::json!({
            "version": found,
            "expected": config.spm_version,
            "matches": matches,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if matches {
        eprintln!("{} SPM {} is available", CHECK, style(&found).green());
    } else {
        eprintln!(
            "{} SPM reports {}, expected {}",
            CROSS,
            style(&found).red(),
            style(&config.spm_version).bold()
        );
    }

    if !matches {
        return Err(ToolkitError::VersionMismatch {
            expected: config.spm_version.clone(),
            found,
        }
        .into());
    }
    Ok(())
}

fn show_options(cmd: &OptionsCommand) -> Result<()> {
    let overrides = cmd.overrides.clone().unwrap_or_default();
    let options = PipelineOptions::resolve(&overrides).context("Invalid pipeline options")?;
    eprintln!("{} Resolved {} override(s)", INFO, style(overrides.len()).cyan());
    println!("{}", serde_json::to_string_pretty(&options)?);
    Ok(())
}
