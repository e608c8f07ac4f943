//! Motion quality control
//!
//! Framewise displacement (Power et al. 2012) from the six realignment
//! parameters SPM writes to `rp_<image>.txt`: three translations in mm and
//! three rotations in radians.

use crate::execution::ExecutionError;
use chrono::Utc;
use std::path::Path;

/// Radius of the sphere used to turn rotations into mm
pub const HEAD_RADIUS_MM: f64 = 50.0;

/// Parse an SPM realignment parameter file
pub fn read_realignment_params(path: &Path) -> Result<Vec<[f64; 6]>, ExecutionError> {
    let content = std::fs::read_to_string(path).map_err(|source| ExecutionError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut rows = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let values = line
            .split_whitespace()
            .map(|v| v.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                ExecutionError::Qc(format!("{} line {}: {}", path.display(), line_no + 1, e))
            })?;
        let row: [f64; 6] = values.try_into().map_err(|v: Vec<f64>| {
            ExecutionError::Qc(format!(
                "{} line {}: expected 6 columns, found {}",
                path.display(),
                line_no + 1,
                v.len()
            ))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Per-volume framewise displacement; the first volume is 0
pub fn framewise_displacement(params: &[[f64; 6]]) -> Vec<f64> {
    let mut fd = Vec::with_capacity(params.len());
    for (t, row) in params.iter().enumerate() {
        if t == 0 {
            fd.push(0.0);
            continue;
        }
        let prev = &params[t - 1];
        let translation: f64 = (0..3).map(|i| (row[i] - prev[i]).abs()).sum();
        let rotation: f64 = (3..6).map(|i| (row[i] - prev[i]).abs()).sum();
        fd.push(translation + HEAD_RADIUS_MM * rotation);
    }
    fd
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Compute FD from `params_file` and write the report to `report_file`.
/// Returns the mean FD.
pub fn write_report(params_file: &Path, report_file: &Path) -> Result<f64, ExecutionError> {
    let params = read_realignment_params(params_file)?;
    let fd = framewise_displacement(&params);
    let mean_fd = mean(&fd);

    let mut report = format!(
        "Mean framewise displacement (mm): {:.6}\nVolumes: {}\nGenerated: {}\n\nvolume\tFD_mm\n",
        mean_fd,
        fd.len(),
        Utc::now().to_rfc3339()
    );
    for (t, value) in fd.iter().enumerate() {
        report.push_str(&format!("{}\t{:.6}\n", t + 1, value));
    }

    std::fs::write(report_file, report).map_err(|source| ExecutionError::Io {
        path: report_file.to_path_buf(),
        source,
    })?;
    Ok(mean_fd)
}
