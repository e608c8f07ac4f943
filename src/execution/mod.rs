//! Pipeline execution

pub mod archive;
pub mod display;
pub mod engine;
pub mod qc;
pub mod reports;
pub mod staging;

pub use engine::{EventHandler, ExecutionEvent, PipelineEngine, RunReport, SubjectOutcome};

use crate::core::OptionError;
use crate::input::InputError;
use crate::toolkit::ToolkitError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while running the pipeline
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Options(#[from] OptionError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Toolkit(#[from] ToolkitError),

    #[error("failed to read NIfTI image: {0}")]
    Nifti(#[from] nifti::NiftiError),

    #[error("registration template {template} has dimensions {found:?}, expected {expected:?}")]
    TemplateMismatch {
        template: PathBuf,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("{0}")]
    Template(String),

    #[error("slice timing: {0}")]
    SliceTiming(String),

    #[error("toolkit did not produce {0}")]
    MissingOutput(PathBuf),

    #[error("quality control: {0}")]
    Qc(String),

    #[error("display image: {0}")]
    Display(String),

    #[error("failed to encode display image: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to write archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExecutionError {
    /// Errors reported to the caller as a message instead of aborting
    pub fn is_reportable(&self) -> bool {
        matches!(
            self,
            ExecutionError::TemplateMismatch { .. } | ExecutionError::Template(_)
        )
    }
}
