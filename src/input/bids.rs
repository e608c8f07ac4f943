//! BIDS dataset discovery
//!
//! Validation is delegated to the external `bids-validator`; this module
//! only walks the `sub-*/[ses-*/]func/` layout and parses filename
//! entities.

use crate::input::volume::{has_nifti_extension, nifti_stem};
use crate::input::InputError;
use crate::toolkit::{ProcessRunner, ToolkitError};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File every BIDS dataset carries at its root
pub const DATASET_DESCRIPTION: &str = "dataset_description.json";

/// Acquisition metadata from a JSON sidecar
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Sidecar {
    #[serde(rename = "RepetitionTime", default)]
    pub repetition_time: Option<f64>,

    /// Slice acquisition onsets in seconds
    #[serde(rename = "SliceTiming", default)]
    pub slice_timing: Option<Vec<f64>>,
}

/// One functional series found in the dataset
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionalRun {
    /// e.g. `sub-01`
    pub subject: String,
    /// e.g. `ses-pre`
    pub session: Option<String>,
    pub task: Option<String>,
    pub run: Option<String>,
    pub image: PathBuf,
    pub sidecar: Option<Sidecar>,
}

impl FunctionalRun {
    /// Directory of this run relative to the dataset root, e.g. `sub-01/ses-pre/func`
    pub fn relative_func_dir(&self) -> PathBuf {
        let mut dir = PathBuf::from(&self.subject);
        if let Some(session) = &self.session {
            dir.push(session);
        }
        dir.push("func");
        dir
    }

    /// Human-readable label, e.g. `sub-01 ses-pre task-rest run-1`
    pub fn label(&self) -> String {
        let mut parts = vec![self.subject.clone()];
        parts.extend(self.session.clone());
        parts.extend(self.task.as_ref().map(|t| format!("task-{}", t)));
        parts.extend(self.run.as_ref().map(|r| format!("run-{}", r)));
        parts.join(" ")
    }
}

/// Whether `root` looks like a BIDS dataset
pub fn looks_like_bids(root: &Path) -> bool {
    root.join(DATASET_DESCRIPTION).is_file()
}

/// Run the external validator. A missing validator is tolerated.
pub async fn validate(
    runner: &dyn ProcessRunner,
    validator: &str,
    root: &Path,
) -> Result<(), InputError> {
    let args = vec![root.display().to_string()];
    match runner.run(validator, &args, None).await {
        Ok(_) => {
            info!("BIDS validation passed for {}", root.display());
            Ok(())
        }
        Err(e) if e.is_missing_program() => {
            warn!("{} not available, skipping BIDS validation", validator);
            Ok(())
        }
        Err(ToolkitError::Exit { stderr, .. }) => Err(InputError::InvalidBids(stderr)),
        Err(e) => Err(InputError::InvalidBids(e.to_string())),
    }
}

/// Find all functional runs with the given suffix (e.g. `bold`)
pub fn find_functional_runs(
    root: &Path,
    scan_type: &str,
) -> Result<Vec<FunctionalRun>, InputError> {
    let name_pattern = Regex::new(&format!(
        r"^(?P<entities>sub-[A-Za-z0-9]+(?:_[A-Za-z]+-[A-Za-z0-9]+)*)_{}$",
        regex::escape(scan_type)
    ))
    .map_err(|e| InputError::InvalidBids(e.to_string()))?;

    let mut runs = Vec::new();
    for subject_dir in sorted_dirs(root, "sub-")? {
        let mut func_dirs = vec![subject_dir.join("func")];
        for session_dir in sorted_dirs(&subject_dir, "ses-")? {
            func_dirs.push(session_dir.join("func"));
        }

        for func_dir in func_dirs.into_iter().filter(|d| d.is_dir()) {
            for image in sorted_files(&func_dir)? {
                if !has_nifti_extension(&image) {
                    continue;
                }
                let stem = nifti_stem(&image);
                let Some(caps) = name_pattern.captures(&stem) else {
                    continue;
                };
                let entities = parse_entities(&caps["entities"]);
                let Some(subject) = entities.get("sub") else {
                    continue;
                };

                let sidecar = find_sidecar(root, &image, &entities, scan_type);
                debug!("Found functional run {}", image.display());
                runs.push(FunctionalRun {
                    subject: format!("sub-{}", subject),
                    session: entities.get("ses").map(|s| format!("ses-{}", s)),
                    task: entities.get("task").cloned(),
                    run: entities.get("run").cloned(),
                    image,
                    sidecar,
                });
            }
        }
    }
    Ok(runs)
}

fn parse_entities(entities: &str) -> HashMap<String, String> {
    entities
        .split('_')
        .filter_map(|pair| pair.split_once('-'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Sidecar next to the image, falling back to the top-level
/// `task-<label>_<suffix>.json` inherited by every run of that task
fn find_sidecar(
    root: &Path,
    image: &Path,
    entities: &HashMap<String, String>,
    scan_type: &str,
) -> Option<Sidecar> {
    let mut candidates = vec![image.with_file_name(format!("{}.json", nifti_stem(image)))];
    if let Some(task) = entities.get("task") {
        candidates.push(root.join(format!("task-{}_{}.json", task, scan_type)));
    }

    candidates.into_iter().filter(|p| p.is_file()).find_map(|path| {
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Sidecar>(&content) {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                warn!("Ignoring unreadable sidecar {}: {}", path.display(), e);
                None
            }
        }
    })
}

fn sorted_dirs(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, InputError> {
    let mut dirs: Vec<PathBuf> = read_dir(dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with(prefix))
                .unwrap_or(false)
        })
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>, InputError> {
    let mut files: Vec<PathBuf> = read_dir(dir)?.into_iter().filter(|p| p.is_file()).collect();
    files.sort();
    Ok(files)
}

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>, InputError> {
    let entries = std::fs::read_dir(dir).map_err(|source| InputError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
}
