//! NIfTI header inspection
//!
//! Only headers are read here; decoding voxel data is left to the
//! display renderer and to the toolkit.

use ::nifti::{NiftiError, NiftiHeader};
use std::path::Path;

/// Geometry facts the pipeline needs from a NIfTI header
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeInfo {
    /// Active dimensions, `dim[1..=dim[0]]`
    pub shape: Vec<usize>,
    /// Repetition time in seconds, when the header records one
    pub repetition_time: Option<f64>,
}

impl VolumeInfo {
    pub fn from_header(header: &NiftiHeader) -> Self {
        let rank = (header.dim[0] as usize).clamp(0, 7);
        let shape = header.dim[1..=rank].iter().map(|d| *d as usize).collect();

        // xyzt_units bits 3..5 carry the time unit
        let scale = match header.xyzt_units & 0x38 {
            0x10 => Some(1e-3),
            0x18 => Some(1e-6),
            0x08 | 0x00 => Some(1.0),
            _ => None,
        };
        let repetition_time = scale
            .map(|s| header.pixdim[4] as f64 * s)
            .filter(|tr| rank >= 4 && *tr > 0.0);

        Self {
            shape,
            repetition_time,
        }
    }

    /// Read the header of a `.nii` or `.nii.gz` file
    pub fn read(path: &Path) -> Result<Self, NiftiError> {
        let header = NiftiHeader::from_file(path)?;
        Ok(Self::from_header(&header))
    }

    /// Number of slices along the third axis
    pub fn num_slices(&self) -> usize {
        self.shape.get(2).copied().unwrap_or(1)
    }

    /// Number of volumes in the time series
    pub fn num_volumes(&self) -> usize {
        self.shape.get(3).copied().unwrap_or(1).max(1)
    }
}

/// Whether `path` carries a readable NIfTI header
pub fn is_nifti(path: &Path) -> bool {
    path.is_file() && NiftiHeader::from_file(path).is_ok()
}

/// Whether the file name has a NIfTI extension
pub fn has_nifti_extension(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(".nii") || name.ends_with(".nii.gz")
}

/// File name without `.nii` / `.nii.gz`
pub fn nifti_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for ext in [".nii.gz", ".nii"] {
        if name.to_lowercase().ends_with(ext) {
            return name[..name.len() - ext.len()].to_string();
        }
    }
    name
}
