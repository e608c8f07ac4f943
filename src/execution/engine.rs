//! Main execution engine - runs every subject through the toolkit

use crate::{
    core::{
        AdapterConfig, ComputationRequest, ComputationResponse, ExecutionStatus, PipelineOptions,
        RunState, SubjectState,
    },
    execution::{archive, display, qc, reports, staging, ExecutionError},
    input::{
        self, dicom,
        volume::{nifti_stem, VolumeInfo},
        InputData, InputFormat, SubjectInput, SubjectSource,
    },
    toolkit::{
        batch::{
            prefixed, NORMALIZE_PREFIX, REALIGN_PARAMS_PREFIX, SLICE_TIMING_PREFIX,
            SMOOTH_PREFIX,
        },
        BatchJob, BatchScript, ProcessRunner, ToolkitExecutor,
    },
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Name of the batch script written into each subject directory
pub const BATCH_SCRIPT_NAME: &str = "fmri_preprocess_batch.m";

/// Events that can occur during a pipeline run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        format: InputFormat,
        subjects: usize,
    },
    SubjectStarted {
        subject: String,
        index: usize,
        total: usize,
    },
    ToolkitStarted {
        subject: String,
    },
    SubjectCompleted {
        subject: String,
        mean_fd: f64,
    },
    SubjectFailed {
        subject: String,
        error: String,
    },
    RunCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Result of one successfully processed subject
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectOutcome {
    pub name: String,
    /// Output directory relative to the write dir
    pub output_dir: PathBuf,
    /// Staged functional series the toolkit outputs are named after
    pub functional: PathBuf,
    pub mean_fd: f64,
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    pub format: InputFormat,
    pub subjects: Vec<(String, SubjectState)>,
    pub outcomes: Vec<SubjectOutcome>,
    pub archive: Option<PathBuf>,
    pub display: Option<String>,
    pub message: String,
}

impl RunReport {
    pub fn into_response(self) -> ComputationResponse {
        ComputationResponse::completed(
            self.message,
            self.archive.map(|p| p.display().to_string()),
            self.display,
        )
    }
}

/// Main pipeline execution engine
pub struct PipelineEngine<T> {
    toolkit: T,
    runner: Arc<dyn ProcessRunner>,
    config: AdapterConfig,
    event_handlers: Vec<EventHandler>,
}

impl<T: ToolkitExecutor> PipelineEngine<T> {
    pub fn new(toolkit: T, runner: Arc<dyn ProcessRunner>, config: AdapterConfig) -> Self {
        Self {
            toolkit,
            runner,
            config,
            event_handlers: Vec::new(),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Handle one computation request end to end
    ///
    /// Invalid options are returned as errors. Missing data, an unwritable
    /// output directory and template problems become message responses.
    pub async fn run(
        &self,
        request: &ComputationRequest,
    ) -> Result<ComputationResponse, ExecutionError> {
        let options = PipelineOptions::resolve(&request.option_overrides())?;
        let write_dir = request.write_dir();

        if let Err(e) = input::ensure_writable(write_dir) {
            warn!("{}", e);
            return Ok(ComputationResponse::message(capitalize(&e.to_string())));
        }

        let data = match input::detect_input(request, &self.config, self.runner.as_ref()).await {
            Ok(data) => data,
            Err(e) => {
                warn!("{}", e);
                return Ok(ComputationResponse::message(capitalize(&e.to_string())));
            }
        };

        match self.execute(&data, &options, write_dir).await {
            Ok(report) => Ok(report.into_response()),
            Err(e) if e.is_reportable() => {
                warn!("{}", e);
                Ok(ComputationResponse::message(capitalize(&e.to_string())))
            }
            Err(e) => Err(e),
        }
    }

    /// Run every subject of `data`, then write guides, display and archive
    pub async fn execute(
        &self,
        data: &InputData,
        options: &PipelineOptions,
        write_dir: &Path,
    ) -> Result<RunReport, ExecutionError> {
        let template = self.resolve_template(options)?;
        let format = data.format();
        let subjects = data.subjects(&self.config.fmri_output_dirname);

        let mut state = RunState::new();
        state.start(subjects.len());
        info!(
            "Starting {} preprocessing run {} with {} subject(s)",
            format,
            state.run_id,
            subjects.len()
        );
        self.emit_event(ExecutionEvent::RunStarted {
            run_id: state.run_id,
            format,
            subjects: subjects.len(),
        });

        let mut states = Vec::with_capacity(subjects.len());
        let mut outcomes = Vec::new();
        for (index, subject) in subjects.iter().enumerate() {
            self.emit_event(ExecutionEvent::SubjectStarted {
                subject: subject.name.clone(),
                index,
                total: subjects.len(),
            });
            let started_at = Utc::now();

            match self.process_subject(subject, options, &template, write_dir).await {
                Ok(outcome) => {
                    state.record_success();
                    info!("{} completed, mean FD {:.4} mm", subject.name, outcome.mean_fd);
                    self.emit_event(ExecutionEvent::SubjectCompleted {
                        subject: subject.name.clone(),
                        mean_fd: outcome.mean_fd,
                    });
                    states.push((
                        subject.name.clone(),
                        SubjectState::Completed {
                            output_dir: write_dir.join(&subject.output_dir),
                            started_at,
                            completed_at: Utc::now(),
                        },
                    ));
                    outcomes.push(outcome);
                }
                Err(e) => {
                    state.record_failure();
                    error!("{} failed: {}", subject.name, e);
                    self.emit_event(ExecutionEvent::SubjectFailed {
                        subject: subject.name.clone(),
                        error: e.to_string(),
                    });
                    states.push((
                        subject.name.clone(),
                        SubjectState::Failed {
                            error: e.to_string(),
                            failed_at: Utc::now(),
                        },
                    ));
                }
            }
        }
        state.finish();

        let guides = reports::write_guides(write_dir, format, options, &self.config)?;

        let (archive, display) = if outcomes.is_empty() {
            (None, None)
        } else {
            let display = self.render_display(&outcomes[0], write_dir);

            let mut entries: Vec<PathBuf> = outcomes.iter().map(|o| o.output_dir.clone()).collect();
            entries.extend(guides.iter().filter_map(|g| g.file_name().map(PathBuf::from)));
            if display.is_some() {
                entries.push(PathBuf::from(&self.config.display_image_name));
            }
            let zip_path = write_dir.join(format!("{}.zip", self.config.output_zip_dir));
            let archive = archive::zip_outputs(write_dir, &entries, &zip_path)?;
            info!("Outputs archived to {}", archive.display());
            (Some(archive), display)
        };

        let message = summary(format, &states);
        info!("Run {} finished: {:?}", state.run_id, state.status);
        self.emit_event(ExecutionEvent::RunCompleted {
            run_id: state.run_id,
            status: state.status,
        });

        Ok(RunReport {
            state,
            format,
            subjects: states,
            outcomes,
            archive,
            display,
            message,
        })
    }

    /// Stage, preprocess and QC one subject
    async fn process_subject(
        &self,
        subject: &SubjectInput,
        options: &PipelineOptions,
        template: &Path,
        write_dir: &Path,
    ) -> Result<SubjectOutcome, ExecutionError> {
        let out_dir = write_dir.join(&subject.output_dir);
        std::fs::create_dir_all(&out_dir).map_err(|source| ExecutionError::Io {
            path: out_dir.clone(),
            source,
        })?;

        let source = match &subject.source {
            SubjectSource::Nifti(path) => path.clone(),
            SubjectSource::DicomSeries(series) => {
                let name = subject.name.replace(' ', "_");
                dicom::convert_series(
                    self.runner.as_ref(),
                    &self.config.dicom_converter_cmd,
                    series,
                    &out_dir,
                    &name,
                )
                .await?
            }
        };

        let functional = staging::stage_image(&source, &out_dir)?;
        let info = VolumeInfo::read(&functional)?;
        let slice_timing =
            staging::slice_timing(&options.slice_timing, &info, subject.sidecar.as_ref())?;
        let slice_timed = slice_timing.is_some();

        self.write_reorientation(options, &out_dir)?;

        let job = BatchJob {
            functional: &functional,
            num_volumes: info.num_volumes(),
            slice_timing,
            options,
            template,
        };
        let script = BatchScript::preprocessing(&job).write_to(&out_dir.join(BATCH_SCRIPT_NAME))?;

        self.emit_event(ExecutionEvent::ToolkitStarted {
            subject: subject.name.clone(),
        });
        self.toolkit.run_batch(&script, &out_dir).await?;

        let mut prefix = String::from(SMOOTH_PREFIX);
        prefix.push_str(NORMALIZE_PREFIX);
        if slice_timed {
            prefix.push_str(SLICE_TIMING_PREFIX);
        }
        let smoothed = prefixed(&functional, &prefix);
        if !smoothed.is_file() {
            return Err(ExecutionError::MissingOutput(smoothed));
        }

        let params_name = format!("{}{}.txt", REALIGN_PARAMS_PREFIX, nifti_stem(&functional));
        let params = out_dir.join(params_name);
        let mean_fd = qc::write_report(&params, &out_dir.join(&self.config.fmri_qc_filename))?;

        Ok(SubjectOutcome {
            name: subject.name.clone(),
            output_dir: subject.output_dir.clone(),
            functional,
            mean_fd,
        })
    }

    /// Custom templates must match the default template's dimensions
    fn resolve_template(&self, options: &PipelineOptions) -> Result<PathBuf, ExecutionError> {
        let default = self.config.template_path();
        let Some(custom) = options.normalize.registration_template.as_deref() else {
            return Ok(default);
        };
        let custom = PathBuf::from(custom);

        let read = |path: &Path| {
            VolumeInfo::read(path).map_err(|e| {
                ExecutionError::Template(format!(
                    "Could not read registration template {}: {}",
                    path.display(),
                    e
                ))
            })
        };
        let expected = read(&default)?;
        let found = read(&custom)?;
        if expected.shape != found.shape {
            return Err(ExecutionError::TemplateMismatch {
                template: custom,
                expected: expected.shape,
                found: found.shape,
            });
        }
        info!("Using registration template {}", custom.display());
        Ok(custom)
    }

    /// Keep the reorientation matrix next to the outputs
    fn write_reorientation(
        &self,
        options: &PipelineOptions,
        out_dir: &Path,
    ) -> Result<(), ExecutionError> {
        let name = self
            .config
            .transf_mat_path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("transform.mat"));
        let path = out_dir.join(name);

        let text: String = options
            .reorientation_matrix()
            .iter()
            .map(|row| {
                // `+ 0.0` folds negative zero
                let cols: Vec<String> = row.iter().map(|v| format!("{:.6}", v + 0.0)).collect();
                cols.join(" ") + "\n"
            })
            .collect();
        std::fs::write(&path, text).map_err(|source| ExecutionError::Io { path, source })
    }

    fn render_display(&self, outcome: &SubjectOutcome, write_dir: &Path) -> Option<String> {
        let prefixes = [self.config.qc_nifti.as_str(), self.config.display_nifti.as_str()];
        let Some(image) = display::find_display_image(&outcome.functional, &prefixes) else {
            warn!(
                "No normalised image of {} found for display",
                outcome.functional.display()
            );
            return None;
        };

        let png = write_dir.join(&self.config.display_image_name);
        match display::write_display(&image, self.config.cut_coords, &png) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                warn!("Could not render display image from {}: {}", image.display(), e);
                None
            }
        }
    }
}

/// Response message for a finished run
fn summary(format: InputFormat, states: &[(String, SubjectState)]) -> String {
    let total = states.len();
    let completed = states
        .iter()
        .filter(|(_, s)| matches!(s, SubjectState::Completed { .. }))
        .count();
    let failed: Vec<(&str, &str)> = states
        .iter()
        .filter_map(|(name, s)| match s {
            SubjectState::Failed { error, .. } => Some((name.as_str(), error.as_str())),
            _ => None,
        })
        .collect();

    if completed == 0 && total > 0 {
        let details: Vec<String> = failed.iter().map(|(n, e)| format!("{} ({})", n, e)).collect();
        return format!(
            "{} preprocessing failed for all {} subject(s): {}",
            format,
            total,
            details.join("; ")
        );
    }

    let mut message = format!(
        "{} preprocessing completed for {} of {} subject(s)",
        format, completed, total
    );
    if !failed.is_empty() {
        let names: Vec<&str> = failed.iter().map(|(n, _)| *n).collect();
        message.push_str(&format!("; failed: {}", names.join(", ")));
    }
    message
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
