//! Core domain models
//!
//! Request and response shapes, adapter configuration, pipeline options
//! and run bookkeeping.

pub mod config;
pub mod options;
pub mod request;
pub mod response;
pub mod state;

pub use config::{AdapterConfig, ConfigError};
pub use options::{OptionError, PipelineOptions, SliceOrder};
pub use request::{ComputationRequest, DataSpec};
pub use response::ComputationResponse;
pub use state::*;
