//! DICOM directory discovery and conversion
//!
//! Files are recognised by the `DICM` marker that follows the 128-byte
//! preamble. Every directory holding such files is treated as one series.
//! Conversion to NIfTI is done by the external `dcm2niix`.

use crate::input::volume::has_nifti_extension;
use crate::input::InputError;
use crate::toolkit::ProcessRunner;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";

/// A directory of DICOM files belonging to one series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DicomSeries {
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Whether the file carries the DICOM marker after the preamble
pub fn has_dicom_marker(path: &Path) -> bool {
    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    let mut head = [0u8; PREAMBLE_LEN + 4];
    file.read_exact(&mut head).is_ok() && &head[PREAMBLE_LEN..] == MAGIC
}

/// Find DICOM series under `root`, grouped by directory
pub fn find_series(root: &Path) -> Vec<DicomSeries> {
    let mut by_dir: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if hidden || file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                pending.push(path);
            } else if has_dicom_marker(&path) {
                by_dir.entry(dir.clone()).or_default().push(path);
            }
        }
    }

    by_dir
        .into_iter()
        .map(|(dir, mut files)| {
            files.sort();
            DicomSeries { dir, files }
        })
        .collect()
}

/// Keep series whose first file parses as a DICOM object
pub fn valid_series(series: Vec<DicomSeries>) -> Vec<DicomSeries> {
    series
        .into_iter()
        .filter(|s| match s.files.first().map(dicom_object::open_file) {
            Some(Ok(_)) => true,
            Some(Err(e)) => {
                warn!("Skipping DICOM series {}: {}", s.dir.display(), e);
                false
            }
            None => false,
        })
        .collect()
}

/// Convert a series into `out_dir` as an uncompressed NIfTI named `name`
pub async fn convert_series(
    runner: &dyn ProcessRunner,
    converter: &str,
    series: &DicomSeries,
    out_dir: &Path,
    name: &str,
) -> Result<PathBuf, InputError> {
    info!("Converting DICOM series {} to NIfTI", series.dir.display());
    let args = vec![
        "-z".to_string(),
        "n".to_string(),
        "-f".to_string(),
        name.to_string(),
        "-o".to_string(),
        out_dir.display().to_string(),
        series.dir.display().to_string(),
    ];
    runner
        .run(converter, &args, None)
        .await
        .map_err(|e| InputError::Conversion {
            series: series.dir.clone(),
            reason: e.to_string(),
        })?;

    // dcm2niix may append suffixes (e.g. `_e2`) so match by prefix
    let mut produced: Vec<PathBuf> = std::fs::read_dir(out_dir)
        .map_err(|source| InputError::Io {
            path: out_dir.to_path_buf(),
            source,
        })?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| has_nifti_extension(p))
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with(name))
                .unwrap_or(false)
        })
        .collect();
    produced.sort();
    debug!("Converter produced {:?}", produced);

    produced.into_iter().next().ok_or_else(|| InputError::Conversion {
        series: series.dir.clone(),
        reason: "converter produced no NIfTI output".to_string(),
    })
}
