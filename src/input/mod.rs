//! Input data detection
//!
//! Decides whether the request points at a BIDS dataset, a list of NIfTI
//! files, or a directory of DICOM series, and turns the result into a flat
//! list of subjects for the pipeline.

pub mod bids;
pub mod dicom;
pub mod paths_file;
pub mod volume;

use crate::core::{AdapterConfig, ComputationRequest, DataSpec};
use crate::toolkit::ProcessRunner;
use bids::{FunctionalRun, Sidecar};
use dicom::DicomSeries;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while locating input data
#[derive(Debug, Error)]
pub enum InputError {
    #[error("no BIDS, NIfTI or DICOM fMRI data found in {0}")]
    NoData(PathBuf),

    #[error("output directory {path} is not writable: {source}")]
    NotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("BIDS validation failed: {0}")]
    InvalidBids(String),

    #[error("failed to convert DICOM series {series}: {reason}")]
    Conversion { series: PathBuf, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Accepted input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Bids,
    Nifti,
    Dicom,
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFormat::Bids => write!(f, "BIDS"),
            InputFormat::Nifti => write!(f, "NIfTI"),
            InputFormat::Dicom => write!(f, "DICOM"),
        }
    }
}

/// Validated input data
#[derive(Debug, Clone, PartialEq)]
pub enum InputData {
    Bids { root: PathBuf, runs: Vec<FunctionalRun> },
    Nifti { files: Vec<PathBuf> },
    Dicom { series: Vec<DicomSeries> },
}

/// Where a subject's functional image comes from
#[derive(Debug, Clone, PartialEq)]
pub enum SubjectSource {
    Nifti(PathBuf),
    DicomSeries(DicomSeries),
}

/// One unit of work for the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectInput {
    /// Display name, e.g. `sub-01` or `sub-01 task-rest`
    pub name: String,
    /// Output directory relative to the write dir
    pub output_dir: PathBuf,
    pub source: SubjectSource,
    pub sidecar: Option<Sidecar>,
}

impl InputData {
    pub fn format(&self) -> InputFormat {
        match self {
            InputData::Bids { .. } => InputFormat::Bids,
            InputData::Nifti { .. } => InputFormat::Nifti,
            InputData::Dicom { .. } => InputFormat::Dicom,
        }
    }

    /// Flatten into subjects with their output directories
    ///
    /// BIDS runs keep their `sub-*/[ses-*/]func` layout; NIfTI files and
    /// DICOM series are numbered `sub-1`, `sub-2`, ... in input order.
    pub fn subjects(&self, output_dirname: &str) -> Vec<SubjectInput> {
        match self {
            InputData::Bids { runs, .. } => {
                let mut subjects = Vec::with_capacity(runs.len());
                for run in runs {
                    let func_dir = run.relative_func_dir();
                    let shared = runs
                        .iter()
                        .filter(|other| other.relative_func_dir() == func_dir)
                        .count()
                        > 1;
                    // Several runs in one func dir each get their own output dir
                    let dirname = if shared {
                        format!("{}_{}", output_dirname, volume::nifti_stem(&run.image))
                    } else {
                        output_dirname.to_string()
                    };
                    subjects.push(SubjectInput {
                        name: run.label(),
                        output_dir: func_dir.join(dirname),
                        source: SubjectSource::Nifti(run.image.clone()),
                        sidecar: run.sidecar.clone(),
                    });
                }
                subjects
            }
            InputData::Nifti { files } => files
                .iter()
                .enumerate()
                .map(|(i, file)| {
                    let name = format!("sub-{}", i + 1);
                    SubjectInput {
                        output_dir: PathBuf::from(&name).join("func").join(output_dirname),
                        name,
                        source: SubjectSource::Nifti(file.clone()),
                        sidecar: None,
                    }
                })
                .collect(),
            InputData::Dicom { series } => series
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    let name = format!("sub-{}", i + 1);
                    SubjectInput {
                        output_dir: PathBuf::from(&name).join("func").join(output_dirname),
                        name,
                        source: SubjectSource::DicomSeries(s.clone()),
                        sidecar: None,
                    }
                })
                .collect(),
        }
    }
}

/// Locate input data for a request
///
/// Order: explicit NIfTI list, BIDS dataset, NIfTI list file, DICOM tree.
pub async fn detect_input(
    request: &ComputationRequest,
    config: &AdapterConfig,
    runner: &dyn ProcessRunner,
) -> Result<InputData, InputError> {
    let base = &request.state.base_directory;

    if let Some(DataSpec::Paths(paths)) = &request.input.data {
        let candidates: Vec<PathBuf> = paths
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { base.join(p) })
            .collect();
        let files = paths_file::valid_niftis(&candidates);
        if files.is_empty() {
            return Err(InputError::NoData(base.clone()));
        }
        info!("Using {} NIfTI file(s) from the request", files.len());
        return Ok(InputData::Nifti { files });
    }

    let root = request.data_root();
    debug!("Looking for input data in {}", root.display());

    if bids::looks_like_bids(&root) {
        match bids::validate(runner, &config.bids_validator_cmd, &root).await {
            Ok(()) => {
                let runs = bids::find_functional_runs(&root, &config.scan_type)?;
                if !runs.is_empty() {
                    info!("Found BIDS dataset with {} functional run(s)", runs.len());
                    return Ok(InputData::Bids { root, runs });
                }
                warn!("BIDS dataset has no *_{} functional runs", config.scan_type);
            }
            Err(e) => warn!("{}", e),
        }
    }

    if let Some(list) = paths_file::find_paths_file(&root) {
        let candidates = paths_file::read_paths_file(&list, &root)?;
        let files = paths_file::valid_niftis(&candidates);
        if !files.is_empty() {
            info!("Found {} NIfTI file(s) listed in {}", files.len(), list.display());
            return Ok(InputData::Nifti { files });
        }
        warn!("{} lists no readable NIfTI files", list.display());
    }

    let series = dicom::valid_series(dicom::find_series(&root));
    if !series.is_empty() {
        info!("Found {} DICOM series", series.len());
        return Ok(InputData::Dicom { series });
    }

    Err(InputError::NoData(root))
}

/// Make sure `dir` exists and accepts new files
pub fn ensure_writable(dir: &Path) -> Result<(), InputError> {
    let not_writable = |source| InputError::NotWritable {
        path: dir.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(not_writable)?;

    let probe = dir.join(format!(".write-probe-{}", uuid::Uuid::new_v4().simple()));
    std::fs::write(&probe, b"").map_err(not_writable)?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}
