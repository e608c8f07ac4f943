//! SPM12 batch script generation
//!
//! The toolkit runs MATLAB `matlabbatch` jobs. One job per subject chains
//! reorientation, realignment, slice-timing correction, normalisation and
//! smoothing on explicit file names, so each stage reads the files the
//! previous stage wrote.

use crate::core::PipelineOptions;
use crate::toolkit::ToolkitError;
use std::path::{Path, PathBuf};

/// Prefix SPM adds to slice-timing corrected images
pub const SLICE_TIMING_PREFIX: &str = "a";
/// Prefix SPM adds to normalised images
pub const NORMALIZE_PREFIX: &str = "w";
/// Prefix SPM adds to smoothed images
pub const SMOOTH_PREFIX: &str = "s";
/// Prefix of the realignment mean image
pub const MEAN_PREFIX: &str = "mean";
/// Prefix of the realignment parameter file
pub const REALIGN_PARAMS_PREFIX: &str = "rp_";

/// Resolved slice-timing parameters for one series
#[derive(Debug, Clone, PartialEq)]
pub struct SliceTimingParams {
    pub num_slices: usize,
    pub repetition_time: f64,
    /// Slice indices, or acquisition times in ms when `in_ms` is set
    pub order: Vec<f64>,
    /// Reference slice index, or reference time in ms
    pub reference: f64,
    pub in_ms: bool,
}

impl SliceTimingParams {
    /// Acquisition time of one volume, as SPM defines it
    pub fn acquisition_time(&self) -> f64 {
        if self.in_ms {
            // SPM ignores TA when timings are given
            return 0.0;
        }
        self.repetition_time - self.repetition_time / self.num_slices as f64
    }
}

/// Everything the batch for one series needs
#[derive(Debug, Clone)]
pub struct BatchJob<'a> {
    /// Uncompressed 4D functional image inside the subject output dir
    pub functional: &'a Path,
    pub num_volumes: usize,
    pub slice_timing: Option<SliceTimingParams>,
    pub options: &'a PipelineOptions,
    /// Normalisation template (tissue probability map)
    pub template: &'a Path,
}

/// A rendered MATLAB batch script
#[derive(Debug, Clone)]
pub struct BatchScript {
    text: String,
}

impl BatchScript {
    /// Render the preprocessing batch for one series
    pub fn preprocessing(job: &BatchJob<'_>) -> Self {
        let mut s = String::new();
        let opts = job.options;

        push_line(&mut s, "% fMRI preprocessing batch generated by fmri-preprocess");
        push_line(&mut s, "spm('defaults', 'fmri');");
        push_line(&mut s, "spm_jobman('initcfg');");
        s.push('\n');

        let scans = cell_column(&frames(job.functional, job.num_volumes));
        push_line(&mut s, format!("scans = {};", scans));
        s.push('\n');

        // 1. Reorient in place
        push_line(&mut s, "matlabbatch{1}.spm.util.reorient.srcfiles = scans;");
        push_line(
            &mut s,
            format!(
                "matlabbatch{{1}}.spm.util.reorient.transform.transM = {};",
                matrix(&opts.reorientation_matrix())
            ),
        );
        push_line(&mut s, "matlabbatch{1}.spm.util.reorient.prefix = '';");
        s.push('\n');

        // 2. Realign: estimate parameters, write the mean image
        let r = &opts.realign;
        let realign = "matlabbatch{2}.spm.spatial.realign.estwrite";
        push_line(&mut s, format!("{}.data = {{scans}};", realign));
        push_line(&mut s, format!("{}.eoptions.quality = {};", realign, r.quality));
        push_line(&mut s, format!("{}.eoptions.sep = {};", realign, r.separation));
        push_line(&mut s, format!("{}.eoptions.fwhm = {};", realign, r.fwhm));
        push_line(&mut s, format!("{}.eoptions.rtm = {};", realign, u8::from(r.register_to_mean)));
        push_line(&mut s, format!("{}.eoptions.interp = {};", realign, r.interp));
        push_line(&mut s, format!("{}.eoptions.wrap = {};", realign, int_vector(&r.wrap)));
        push_line(&mut s, format!("{}.eoptions.weight = '';", realign));
        push_line(&mut s, format!("{}.roptions.which = {};", realign, int_vector(&r.write_which)));
        push_line(&mut s, format!("{}.roptions.interp = {};", realign, r.write_interp));
        push_line(&mut s, format!("{}.roptions.wrap = {};", realign, int_vector(&r.write_wrap)));
        push_line(&mut s, format!("{}.roptions.mask = {};", realign, u8::from(r.write_mask)));
        push_line(&mut s, format!("{}.roptions.prefix = 'r';", realign));
        s.push('\n');

        let mut next = 3;
        let mut current = job.functional.to_path_buf();

        // 3. Slice timing
        if let Some(st) = &job.slice_timing {
            let stc = format!("matlabbatch{{{}}}.spm.temporal.st", next);
            push_line(&mut s, format!("{}.scans = {{scans}};", stc));
            push_line(&mut s, format!("{}.nslices = {};", stc, st.num_slices));
            push_line(&mut s, format!("{}.tr = {};", stc, st.repetition_time));
            push_line(&mut s, format!("{}.ta = {};", stc, st.acquisition_time()));
            push_line(&mut s, format!("{}.so = {};", stc, float_vector(&st.order)));
            push_line(&mut s, format!("{}.refslice = {};", stc, st.reference));
            push_line(&mut s, format!("{}.prefix = '{}';", stc, SLICE_TIMING_PREFIX));
            s.push('\n');
            next += 1;
            current = prefixed(&current, SLICE_TIMING_PREFIX);
        }

        // 4. Normalise: estimate from the mean (or first) image, write the series
        let n = &opts.normalize;
        let reference = if r.write_which[1] == 1 {
            frame(&prefixed(job.functional, MEAN_PREFIX), 1)
        } else {
            frame(job.functional, 1)
        };
        let norm = format!("matlabbatch{{{}}}.spm.spatial.normalise.estwrite", next);
        push_line(&mut s, format!("{}.subj.vol = {{{}}};", norm, quote(&reference)));
        push_line(
            &mut s,
            format!(
                "{}.subj.resample = {};",
                norm,
                cell_column(&frames(&current, job.num_volumes))
            ),
        );
        push_line(&mut s, format!("{}.eoptions.biasreg = {};", norm, n.bias_regularization));
        push_line(&mut s, format!("{}.eoptions.biasfwhm = {};", norm, n.bias_fwhm));
        push_line(
            &mut s,
            format!(
                "{}.eoptions.tpm = {{{}}};",
                norm,
                quote(&job.template.display().to_string())
            ),
        );
        let affreg = n.affine_regularization.as_str();
        push_line(&mut s, format!("{}.eoptions.affreg = '{}';", norm, affreg));
        let reg = float_vector(&n.warping_regularization);
        push_line(&mut s, format!("{}.eoptions.reg = {};", norm, reg));
        push_line(&mut s, format!("{}.eoptions.fwhm = {};", norm, n.smoothness));
        push_line(&mut s, format!("{}.eoptions.samp = {};", norm, n.sampling_distance));
        let bb = &n.write_bounding_box;
        push_line(
            &mut s,
            format!(
                "{}.woptions.bb = [{} {} {}; {} {} {}];",
                norm, bb[0], bb[1], bb[2], bb[3], bb[4], bb[5]
            ),
        );
        let vox = float_vector(&n.write_voxel_sizes);
        push_line(&mut s, format!("{}.woptions.vox = {};", norm, vox));
        push_line(&mut s, format!("{}.woptions.interp = {};", norm, n.write_interp));
        push_line(&mut s, format!("{}.woptions.prefix = '{}';", norm, NORMALIZE_PREFIX));
        s.push('\n');
        next += 1;
        current = prefixed(&current, NORMALIZE_PREFIX);

        // 5. Smooth
        let sm = &opts.smoothing;
        let smooth = format!("matlabbatch{{{}}}.spm.spatial.smooth", next);
        push_line(
            &mut s,
            format!(
                "{}.data = {};",
                smooth,
                cell_column(&frames(&current, job.num_volumes))
            ),
        );
        push_line(&mut s, format!("{}.fwhm = {};", smooth, float_vector(&sm.fwhm)));
        push_line(&mut s, format!("{}.dtype = {};", smooth, sm.data_type));
        push_line(&mut s, format!("{}.im = {};", smooth, u8::from(sm.implicit_masking)));
        push_line(&mut s, format!("{}.prefix = '{}';", smooth, SMOOTH_PREFIX));
        s.push('\n');

        push_line(&mut s, "spm_jobman('run', matlabbatch);");

        Self { text: s }
    }

    /// Script that prints the toolkit version as `SPM_VERSION=<ver>.<release>`
    pub fn version_probe() -> Self {
        let text = "[name, release] = spm('Ver', '', 1);\n\
                    fprintf('SPM_VERSION=%s.%s\\n', regexprep(name, '^SPM', ''), release);\n"
            .to_string();
        Self { text }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Write the script to `path`
    pub fn write_to(&self, path: &Path) -> Result<PathBuf, ToolkitError> {
        std::fs::write(path, &self.text).map_err(|source| ToolkitError::Script {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(path.to_path_buf())
    }
}

fn push_line(s: &mut String, line: impl AsRef<str>) {
    s.push_str(line.as_ref());
    s.push('\n');
}

/// `dir/name` becomes `dir/<prefix>name`
pub fn prefixed(path: &Path, prefix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}", prefix, name))
}

fn frame(path: &Path, index: usize) -> String {
    format!("{},{}", path.display(), index)
}

fn frames(path: &Path, count: usize) -> Vec<String> {
    (1..=count.max(1)).map(|i| frame(path, i)).collect()
}

/// MATLAB single-quoted string literal
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn cell_column(items: &[String]) -> String {
    let mut out = String::from("{\n");
    for item in items {
        push_line(&mut out, format!("    {}", quote(item)));
    }
    out.push('}');
    out
}

/// Number literal without a negative zero
fn number(v: f64) -> String {
    if v == 0.0 {
        "0".to_string()
    } else {
        v.to_string()
    }
}

fn float_vector(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| number(*v)).collect();
    format!("[{}]", parts.join(" "))
}

fn int_vector(values: &[i64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(" "))
}

fn matrix(m: &[[f64; 4]; 4]) -> String {
    let rows: Vec<String> = m
        .iter()
        .map(|row| {
            row.iter()
                .map(|v| number(*v))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    format!("[{}]", rows.join("; "))
}
