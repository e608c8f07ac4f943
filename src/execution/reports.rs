//! Plain-text guides shipped with the outputs

use crate::core::{AdapterConfig, PipelineOptions};
use crate::execution::ExecutionError;
use crate::input::InputFormat;
use std::path::{Path, PathBuf};

const SPM_REFERENCES: &str = "For more info. please refer to spm12 manual here: \
http://www.fil.ion.ucl.ac.uk/spm/doc/manual.pdf and release notes here: \
http://www.fil.ion.ucl.ac.uk/spm/software/spm12/SPM12_Release_Notes.pdf";

/// Outputs manual describing the file prefixes
pub fn outputs_manual(format: InputFormat, options: &PipelineOptions) -> String {
    let fwhm = options
        .smoothing
        .fwhm
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ");

    let mut text = String::new();
    if format != InputFormat::Bids {
        text.push_str(
            "sub-1,sub-2,sub-* denotes each input series in the order it was given\n",
        );
    }
    text.push_str("Prefixes descriptions for pre-processed images:\n");
    if options.slice_timing.enabled {
        text.push_str("a-Slicetime corrected\n");
    }
    text.push_str("w-Normalized\n");
    text.push_str(&format!("s-Smoothed with fwhm(mm) [{}]\n", fwhm));
    text.push_str("mean-Mean image from realignment\n");
    text.push_str("rp_-Realignment parameters (translations in mm, rotations in radians)\n");
    text.push_str(SPM_REFERENCES);
    text.push('\n');
    text
}

/// Readme explaining the QC file
pub fn qc_readme(config: &AdapterConfig) -> String {
    format!(
        "In each subject's func/{dir} directory, {qc} gives the mean framewise displacement \
         followed by the per-volume values.\n\
         Framewise Displacement of a time series is defined as the sum of the absolute values \
         of the derivatives of the six realignment parameters.\n\
         Rotational displacements are converted from radians to millimeters by calculating \
         displacement on the surface of a sphere of radius 50 mm.\n\
         FD = 0.15-0.2 mm: significant changes begin to be seen\n\
         FD > 0.5 mm: marked correlation changes observed\n",
        dir = config.fmri_output_dirname,
        qc = config.fmri_qc_filename,
    )
}

/// Write both guides into `write_dir`, returning their paths
pub fn write_guides(
    write_dir: &Path,
    format: InputFormat,
    options: &PipelineOptions,
    config: &AdapterConfig,
) -> Result<Vec<PathBuf>, ExecutionError> {
    let files = [
        (
            write_dir.join(&config.outputs_manual_name),
            outputs_manual(format, options),
        ),
        (write_dir.join(&config.qc_readme_name), qc_readme(config)),
    ];

    let mut written = Vec::with_capacity(files.len());
    for (path, content) in files {
        std::fs::write(&path, content).map_err(|source| ExecutionError::Io {
            path: path.clone(),
            source,
        })?;
        written.push(path);
    }
    Ok(written)
}
