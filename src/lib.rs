//! fmri-preprocess - SPM12 fMRI preprocessing adapter
//!
//! Takes a computation request describing BIDS, NIfTI or DICOM input,
//! runs reorientation, realignment, slice-timing correction, normalisation
//! and smoothing through the SPM12 standalone, and packages the results.

pub mod cli;
pub mod core;
pub mod execution;
pub mod input;
pub mod toolkit;

// Re-export commonly used types
pub use core::{
    AdapterConfig, ComputationRequest, ComputationResponse, ExecutionStatus, PipelineOptions,
};
pub use execution::{ExecutionError, ExecutionEvent, PipelineEngine, RunReport};
pub use input::{InputData, InputError, InputFormat};
pub use toolkit::{
    ProcessRunner, SpmStandaloneClient, SystemProcessRunner, ToolkitError, ToolkitExecutor,
};
