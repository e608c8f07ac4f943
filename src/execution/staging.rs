//! Per-subject input staging
//!
//! SPM writes its outputs next to its inputs, so every functional image is
//! first copied (or decompressed) into the subject output directory.

use crate::core::options::SliceTimingOptions;
use crate::core::SliceOrder;
use crate::execution::ExecutionError;
use crate::input::bids::Sidecar;
use crate::input::volume::{nifti_stem, VolumeInfo};
use crate::toolkit::SliceTimingParams;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Place an uncompressed copy of `source` in `out_dir` as `<stem>.nii`
pub fn stage_image(source: &Path, out_dir: &Path) -> Result<PathBuf, ExecutionError> {
    let dest = out_dir.join(format!("{}.nii", nifti_stem(source)));
    if dest == source {
        return Ok(dest);
    }

    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ExecutionError::Io { path, source }
    };

    let gzipped = source
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase().ends_with(".gz"))
        .unwrap_or(false);

    if gzipped {
        debug!("Decompressing {} into {}", source.display(), dest.display());
        let input = File::open(source).map_err(io_err(source))?;
        let mut decoder = GzDecoder::new(BufReader::new(input));
        let output = File::create(&dest).map_err(io_err(&dest))?;
        let mut writer = BufWriter::new(output);
        io::copy(&mut decoder, &mut writer).map_err(io_err(source))?;
    } else {
        debug!("Copying {} into {}", source.display(), dest.display());
        std::fs::copy(source, &dest).map_err(io_err(source))?;
    }
    Ok(dest)
}

/// Work out slice-timing parameters for one series
///
/// Each value comes from the options first, then the BIDS sidecar, then
/// the NIfTI header. Returns `None` when slice timing is disabled.
pub fn slice_timing(
    opts: &SliceTimingOptions,
    info: &VolumeInfo,
    sidecar: Option<&Sidecar>,
) -> Result<Option<SliceTimingParams>, ExecutionError> {
    if !opts.enabled {
        return Ok(None);
    }

    let repetition_time = opts
        .repetition_time
        .or_else(|| sidecar.and_then(|s| s.repetition_time))
        .or(info.repetition_time)
        .filter(|tr| *tr > 0.0)
        .ok_or_else(|| ExecutionError::SliceTiming("repetition time is unknown".to_string()))?;

    let num_slices = opts.num_slices.unwrap_or_else(|| info.num_slices());
    if num_slices == 0 {
        return Err(ExecutionError::SliceTiming("series has no slices".to_string()));
    }

    let order = match (&opts.slice_order, sidecar.and_then(|s| s.slice_timing.as_ref())) {
        (Some(order), _) => order.clone(),
        // Sidecar onsets are in seconds, SPM wants ms
        (None, Some(onsets)) if onsets.len() == num_slices => {
            SliceOrder::Timings(onsets.iter().map(|t| t * 1000.0).collect())
        }
        _ => SliceOrder::Ascending,
    };

    let sequence = order.sequence(num_slices);
    if sequence.len() != num_slices {
        return Err(ExecutionError::SliceTiming(format!(
            "slice order has {} entries for {} slices",
            sequence.len(),
            num_slices
        )));
    }

    if let SliceOrder::Explicit(indices) = &order {
        check_slice_indices(indices, num_slices)?;
    }

    let ref_slice = opts.ref_slice.unwrap_or((num_slices + 1) / 2);
    if ref_slice == 0 || ref_slice > num_slices {
        return Err(ExecutionError::SliceTiming(format!(
            "reference slice {} outside 1..={}",
            ref_slice, num_slices
        )));
    }

    let in_ms = order.is_timing();
    let reference = if in_ms {
        sequence[ref_slice - 1]
    } else {
        ref_slice as f64
    };

    Ok(Some(SliceTimingParams {
        num_slices,
        repetition_time,
        order: sequence,
        reference,
        in_ms,
    }))
}

/// Explicit orders must list every slice `1..=num_slices` exactly once
fn check_slice_indices(indices: &[usize], num_slices: usize) -> Result<(), ExecutionError> {
    let mut seen = vec![false; num_slices];
    for &index in indices {
        if index == 0 || index > num_slices {
            return Err(ExecutionError::SliceTiming(format!(
                "slice index {} outside 1..={}",
                index, num_slices
            )));
        }
        if std::mem::replace(&mut seen[index - 1], true) {
            return Err(ExecutionError::SliceTiming(format!(
                "slice index {} listed more than once",
                index
            )));
        }
    }
    Ok(())
}
