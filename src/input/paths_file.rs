//! NIfTI path lists given as a `.csv` or `.txt` file

use crate::input::volume::is_nifti;
use crate::input::InputError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// First `*.csv` file in `dir`, else the first `*.txt`
pub fn find_paths_file(dir: &Path) -> Option<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    for ext in ["csv", "txt"] {
        let found = files.iter().find(|p| {
            p.extension()
                .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
                .unwrap_or(false)
        });
        if let Some(path) = found {
            return Some(path.clone());
        }
    }
    None
}

/// Read candidate paths from a list file
///
/// One path per line; CSV lines may hold several comma separated entries.
/// Relative paths resolve against `base`.
pub fn read_paths_file(file: &Path, base: &Path) -> Result<Vec<PathBuf>, InputError> {
    let content = std::fs::read_to_string(file).map_err(|source| InputError::Io {
        path: file.to_path_buf(),
        source,
    })?;

    Ok(content
        .lines()
        .flat_map(|line| line.split(','))
        .map(|entry| entry.trim().trim_matches('"'))
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let path = PathBuf::from(entry);
            if path.is_absolute() {
                path
            } else {
                base.join(path)
            }
        })
        .collect())
}

/// Keep the paths that hold readable NIfTI images, in order
pub fn valid_niftis(candidates: &[PathBuf]) -> Vec<PathBuf> {
    candidates
        .iter()
        .filter(|path| {
            let ok = is_nifti(path);
            if ok {
                debug!("Accepted NIfTI {}", path.display());
            } else {
                warn!("Skipping {}: not a readable NIfTI file", path.display());
            }
            ok
        })
        .cloned()
        .collect()
}
