//! Pipeline options: defaults plus caller-supplied overrides
//!
//! The caller sends a flat JSON object of option names to primitive values.
//! Each known key is parsed into its typed field; anything that does not
//! parse to the expected primitive is rejected with the offending key.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Error raised while resolving a single option
#[derive(Debug, Error, PartialEq)]
pub enum OptionError {
    #[error("option '{key}' expects {expected}, got {found}")]
    InvalidType {
        key: String,
        expected: &'static str,
        found: String,
    },

    #[error("option '{key}' expects {expected} values, got {found}")]
    WrongLength {
        key: String,
        expected: usize,
        found: usize,
    },

    #[error("option '{key}' out of range ({value}): {reason}")]
    OutOfRange {
        key: String,
        value: String,
        reason: &'static str,
    },
}

/// Twelve-parameter reorientation applied before realignment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReorientParams {
    pub x_mm: f64,
    pub y_mm: f64,
    pub z_mm: f64,
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
    pub x_scaling: f64,
    pub y_scaling: f64,
    pub z_scaling: f64,
    pub x_affine: f64,
    pub y_affine: f64,
    pub z_affine: f64,
}

impl Default for ReorientParams {
    fn default() -> Self {
        Self {
            x_mm: 0.0,
            y_mm: 0.0,
            z_mm: 0.0,
            pitch: 0.0,
            roll: 0.0,
            yaw: 0.0,
            x_scaling: 1.0,
            y_scaling: 1.0,
            z_scaling: 1.0,
            x_affine: 0.0,
            y_affine: 0.0,
            z_affine: 0.0,
        }
    }
}

/// Realignment estimate and reslice settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealignOptions {
    pub quality: f64,
    pub separation: f64,
    pub fwhm: f64,
    pub register_to_mean: bool,
    pub interp: i64,
    pub wrap: [i64; 3],
    pub write_which: [i64; 2],
    pub write_interp: i64,
    pub write_wrap: [i64; 3],
    pub write_mask: bool,
}

impl Default for RealignOptions {
    fn default() -> Self {
        Self {
            quality: 0.9,
            separation: 4.0,
            fwhm: 5.0,
            register_to_mean: true,
            interp: 2,
            wrap: [0, 0, 0],
            write_which: [0, 1],
            write_interp: 4,
            write_wrap: [0, 0, 0],
            write_mask: true,
        }
    }
}

/// Order in which slices were acquired
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceOrder {
    Ascending,
    Descending,
    InterleavedBottomUp,
    InterleavedTopDown,
    /// Explicit 1-based slice indices in acquisition order
    Explicit(Vec<usize>),
    /// Slice acquisition times in milliseconds
    Timings(Vec<f64>),
}

impl SliceOrder {
    fn parse(key: &str, value: &Value) -> Result<Self, OptionError> {
        match value {
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "ascending" => Ok(Self::Ascending),
                "descending" => Ok(Self::Descending),
                "interleaved_bottom_up" | "interleaved_ascending" => Ok(Self::InterleavedBottomUp),
                "interleaved_top_down" | "interleaved_descending" => Ok(Self::InterleavedTopDown),
                _ => Err(OptionError::InvalidType {
                    key: key.to_string(),
                    expected: "a slice order name or a list of slice indices",
                    found: describe(value),
                }),
            },
            Value::Array(items) => {
                let indices = items
                    .iter()
                    .map(|item| parse_i64(key, item))
                    .collect::<Result<Vec<_>, _>>()?;
                if indices.iter().any(|i| *i < 1) {
                    return Err(OptionError::OutOfRange {
                        key: key.to_string(),
                        value: describe(value),
                        reason: "slice indices are 1-based",
                    });
                }
                Ok(Self::Explicit(indices.into_iter().map(|i| i as usize).collect()))
            }
            _ => Err(OptionError::InvalidType {
                key: key.to_string(),
                expected: "a slice order name or a list of slice indices",
                found: describe(value),
            }),
        }
    }

    /// Slice order vector as SPM expects it
    pub fn sequence(&self, num_slices: usize) -> Vec<f64> {
        let n = num_slices;
        match self {
            Self::Ascending => (1..=n).map(|i| i as f64).collect(),
            Self::Descending => (1..=n).rev().map(|i| i as f64).collect(),
            Self::InterleavedBottomUp => (1..=n)
                .step_by(2)
                .chain((2..=n).step_by(2))
                .map(|i| i as f64)
                .collect(),
            Self::InterleavedTopDown => (1..=n)
                .rev()
                .step_by(2)
                .chain((1..n).rev().step_by(2))
                .map(|i| i as f64)
                .collect(),
            Self::Explicit(indices) => indices.iter().map(|i| *i as f64).collect(),
            Self::Timings(ms) => ms.clone(),
        }
    }

    /// Whether the sequence holds acquisition times rather than indices
    pub fn is_timing(&self) -> bool {
        matches!(self, Self::Timings(_))
    }
}

/// Slice-timing correction settings. `None` means "derive from the data".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SliceTimingOptions {
    pub enabled: bool,
    pub repetition_time: Option<f64>,
    pub num_slices: Option<usize>,
    pub slice_order: Option<SliceOrder>,
    pub ref_slice: Option<usize>,
}

impl Default for SliceTimingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            repetition_time: None,
            num_slices: None,
            slice_order: None,
            ref_slice: None,
        }
    }
}

/// Affine regularisation target used by normalisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AffineRegularization {
    Mni,
    Eastern,
    Subj,
    Disabled,
}

impl AffineRegularization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mni => "mni",
            Self::Eastern => "eastern",
            Self::Subj => "subj",
            Self::Disabled => "none",
        }
    }
}

/// Segmentation-based normalisation settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizeOptions {
    pub bias_regularization: f64,
    pub bias_fwhm: f64,
    pub affine_regularization: AffineRegularization,
    pub warping_regularization: [f64; 5],
    pub smoothness: f64,
    pub sampling_distance: f64,
    pub write_bounding_box: [f64; 6],
    pub write_voxel_sizes: [f64; 3],
    pub write_interp: i64,
    /// Custom template; `None` means the configured TPM
    pub registration_template: Option<String>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            bias_regularization: 0.0001,
            bias_fwhm: 60.0,
            affine_regularization: AffineRegularization::Mni,
            warping_regularization: [0.0, 0.001, 0.5, 0.05, 0.2],
            smoothness: 0.0,
            sampling_distance: 3.0,
            write_bounding_box: [-78.0, -112.0, -70.0, 78.0, 76.0, 85.0],
            write_voxel_sizes: [2.0, 2.0, 2.0],
            write_interp: 4,
            registration_template: None,
        }
    }
}

/// Gaussian smoothing settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmoothingOptions {
    pub fwhm: [f64; 3],
    pub implicit_masking: bool,
    pub data_type: i64,
}

impl Default for SmoothingOptions {
    fn default() -> Self {
        Self {
            fwhm: [6.0, 6.0, 6.0],
            implicit_masking: false,
            data_type: 0,
        }
    }
}

/// The full set of resolved pipeline options
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineOptions {
    pub reorient: ReorientParams,
    pub realign: RealignOptions,
    pub slice_timing: SliceTimingOptions,
    pub normalize: NormalizeOptions,
    pub smoothing: SmoothingOptions,
}

impl PipelineOptions {
    /// Resolve options from defaults and caller overrides
    pub fn resolve(overrides: &Map<String, Value>) -> Result<Self, OptionError> {
        let mut options = Self::default();
        for (key, value) in overrides {
            // Null means "use the default"
            if value.is_null() {
                continue;
            }
            options.apply(key, value)?;
        }
        Ok(options)
    }

    fn apply(&mut self, key: &str, value: &Value) -> Result<(), OptionError> {
        let name = key.strip_prefix("options_").unwrap_or(key);
        let r = &mut self.reorient;
        match name {
            "reorient_params_x_mm" => r.x_mm = parse_f64(key, value)?,
            "reorient_params_y_mm" => r.y_mm = parse_f64(key, value)?,
            "reorient_params_z_mm" => r.z_mm = parse_f64(key, value)?,
            "reorient_params_pitch" => r.pitch = parse_f64(key, value)?,
            "reorient_params_roll" => r.roll = parse_f64(key, value)?,
            "reorient_params_yaw" => r.yaw = parse_f64(key, value)?,
            "reorient_params_x_scaling" => r.x_scaling = parse_f64(key, value)?,
            "reorient_params_y_scaling" => r.y_scaling = parse_f64(key, value)?,
            "reorient_params_z_scaling" => r.z_scaling = parse_f64(key, value)?,
            "reorient_params_x_affine" => r.x_affine = parse_f64(key, value)?,
            "reorient_params_y_affine" => r.y_affine = parse_f64(key, value)?,
            "reorient_params_z_affine" => r.z_affine = parse_f64(key, value)?,

            "realign_quality" => {
                let q = parse_f64(key, value)?;
                check(key, q, q > 0.0 && q <= 1.0, "must be in (0, 1]")?;
                self.realign.quality = q;
            }
            "realign_separation" => self.realign.separation = parse_positive(key, value)?,
            "realign_fwhm" => self.realign.fwhm = parse_positive(key, value)?,
            "realign_register_to_mean" => self.realign.register_to_mean = parse_bool(key, value)?,
            "realign_interp" => self.realign.interp = parse_interp(key, value)?,
            "realign_wrap" => self.realign.wrap = parse_flags::<3>(key, value)?,
            "realign_write_which" => {
                let which = parse_i64_array::<2>(key, value)?;
                let first_ok = (0..=2).contains(&which[0]);
                check(key, which[0] as f64, first_ok, "first entry must be 0, 1 or 2")?;
                let second_ok = (0..=1).contains(&which[1]);
                check(key, which[1] as f64, second_ok, "second entry must be 0 or 1")?;
                self.realign.write_which = which;
            }
            "realign_write_interp" => self.realign.write_interp = parse_interp(key, value)?,
            "realign_write_wrap" => self.realign.write_wrap = parse_flags::<3>(key, value)?,
            "realign_write_mask" => self.realign.write_mask = parse_bool(key, value)?,

            "stc_flag" => self.slice_timing.enabled = parse_bool(key, value)?,
            "stc_repetition_time" => {
                self.slice_timing.repetition_time = Some(parse_positive(key, value)?);
            }
            "stc_num_slices" => {
                let n = parse_i64(key, value)?;
                check(key, n as f64, n > 0, "must be positive")?;
                self.slice_timing.num_slices = Some(n as usize);
            }
            "stc_slice_order" => {
                self.slice_timing.slice_order = Some(SliceOrder::parse(key, value)?);
            }
            "stc_ref_slice" => {
                let n = parse_i64(key, value)?;
                check(key, n as f64, n > 0, "slice indices are 1-based")?;
                self.slice_timing.ref_slice = Some(n as usize);
            }

            "normalize_bias_regularization" | "BIAS_REGULARISATION" => {
                let v = parse_f64(key, value)?;
                check(key, v, v >= 0.0, "must not be negative")?;
                self.normalize.bias_regularization = v;
            }
            "normalize_bias_fwhm" | "FWHM_GAUSSIAN_SMOOTH_BIAS" => {
                self.normalize.bias_fwhm = parse_positive(key, value)?;
            }
            "normalize_affine_regularization" => {
                self.normalize.affine_regularization = parse_affine_regularization(key, value)?;
            }
            "normalize_warping_regularization" => {
                self.normalize.warping_regularization = parse_f64_array::<5>(key, value)?;
            }
            "normalize_smoothness" => {
                let v = parse_f64(key, value)?;
                check(key, v, v >= 0.0, "must not be negative")?;
                self.normalize.smoothness = v;
            }
            "normalize_sampling_distance" => {
                self.normalize.sampling_distance = parse_positive(key, value)?;
            }
            "normalize_write_bounding_box" => {
                self.normalize.write_bounding_box = parse_f64_array::<6>(key, value)?;
            }
            "normalize_write_voxel_sizes" => {
                let sizes = parse_f64_array::<3>(key, value)?;
                for size in sizes {
                    check(key, size, size > 0.0, "voxel sizes must be positive")?;
                }
                self.normalize.write_voxel_sizes = sizes;
            }
            "normalize_write_interp" => self.normalize.write_interp = parse_interp(key, value)?,
            "registration_template" => {
                let path = parse_string(key, value)?;
                if !path.is_empty() {
                    self.normalize.registration_template = Some(path);
                }
            }

            "smoothing_fwhm" | "fwhm" | "FWHM_SMOOTH" => {
                let fwhm = parse_fwhm(key, value)?;
                for v in fwhm {
                    check(key, v, v >= 0.0, "must not be negative")?;
                }
                self.smoothing.fwhm = fwhm;
            }
            "smoothing_implicit_masking" => {
                self.smoothing.implicit_masking = parse_bool(key, value)?;
            }
            "smoothing_data_type" => self.smoothing.data_type = parse_i64(key, value)?,

            _ => {
                warn!("Ignoring unknown pipeline option '{}'", key);
                return Ok(());
            }
        }
        debug!("Option override: {} = {}", key, value);
        Ok(())
    }

    /// Compose the reorientation parameters into a 4x4 affine
    ///
    /// Follows `spm_matrix`: translation, then rotation (pitch, roll, yaw),
    /// then zoom, then shear.
    pub fn reorientation_matrix(&self) -> [[f64; 4]; 4] {
        let p = &self.reorient;
        let translation = [
            [1.0, 0.0, 0.0, p.x_mm],
            [0.0, 1.0, 0.0, p.y_mm],
            [0.0, 0.0, 1.0, p.z_mm],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let (s1, c1) = p.pitch.sin_cos();
        let pitch = [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, c1, s1, 0.0],
            [0.0, -s1, c1, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let (s2, c2) = p.roll.sin_cos();
        let roll = [
            [c2, 0.0, s2, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [-s2, 0.0, c2, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let (s3, c3) = p.yaw.sin_cos();
        let yaw = [
            [c3, s3, 0.0, 0.0],
            [-s3, c3, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let zoom = [
            [p.x_scaling, 0.0, 0.0, 0.0],
            [0.0, p.y_scaling, 0.0, 0.0],
            [0.0, 0.0, p.z_scaling, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let shear = [
            [1.0, p.x_affine, p.y_affine, 0.0],
            [0.0, 1.0, p.z_affine, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];

        let rotation = mat_mul(&mat_mul(&pitch, &roll), &yaw);
        mat_mul(&mat_mul(&mat_mul(&translation, &rotation), &zoom), &shear)
    }
}

fn mat_mul(a: &[[f64; 4]; 4], b: &[[f64; 4]; 4]) -> [[f64; 4]; 4] {
    let mut out = [[0.0; 4]; 4];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..4).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        other => other.to_string(),
    }
}

fn check(key: &str, value: f64, ok: bool, reason: &'static str) -> Result<(), OptionError> {
    if ok {
        Ok(())
    } else {
        Err(OptionError::OutOfRange {
            key: key.to_string(),
            value: value.to_string(),
            reason,
        })
    }
}

fn parse_f64(key: &str, value: &Value) -> Result<f64, OptionError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| OptionError::InvalidType {
            key: key.to_string(),
            expected: "a number",
            found: describe(value),
        })
}

fn parse_positive(key: &str, value: &Value) -> Result<f64, OptionError> {
    let v = parse_f64(key, value)?;
    check(key, v, v > 0.0, "must be positive")?;
    Ok(v)
}

fn parse_i64(key: &str, value: &Value) -> Result<i64, OptionError> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| OptionError::InvalidType {
        key: key.to_string(),
        expected: "an integer",
        found: describe(value),
    })
}

fn parse_interp(key: &str, value: &Value) -> Result<i64, OptionError> {
    let v = parse_i64(key, value)?;
    check(key, v as f64, (0..=7).contains(&v), "interpolation degree must be 0..=7")?;
    Ok(v)
}

fn parse_bool(key: &str, value: &Value) -> Result<bool, OptionError> {
    let parsed = match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    };
    parsed.ok_or_else(|| OptionError::InvalidType {
        key: key.to_string(),
        expected: "a boolean",
        found: describe(value),
    })
}

fn parse_string(key: &str, value: &Value) -> Result<String, OptionError> {
    match value {
        Value::String(s) => Ok(s.trim().to_string()),
        _ => Err(OptionError::InvalidType {
            key: key.to_string(),
            expected: "a string",
            found: describe(value),
        }),
    }
}

/// Vector elements: a JSON array, or a string of numbers separated by
/// whitespace or commas
fn vector_items(key: &str, value: &Value) -> Result<Vec<Value>, OptionError> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::String(s) => Ok(s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(|part| Value::String(part.to_string()))
            .collect()),
        _ => Err(OptionError::InvalidType {
            key: key.to_string(),
            expected: "a list of numbers",
            found: describe(value),
        }),
    }
}

fn parse_f64_array<const N: usize>(key: &str, value: &Value) -> Result<[f64; N], OptionError> {
    let items = vector_items(key, value)?;
    if items.len() != N {
        return Err(OptionError::WrongLength {
            key: key.to_string(),
            expected: N,
            found: items.len(),
        });
    }
    let mut out = [0.0; N];
    for (slot, item) in out.iter_mut().zip(&items) {
        *slot = parse_f64(key, item)?;
    }
    Ok(out)
}

fn parse_i64_array<const N: usize>(key: &str, value: &Value) -> Result<[i64; N], OptionError> {
    let items = vector_items(key, value)?;
    if items.len() != N {
        return Err(OptionError::WrongLength {
            key: key.to_string(),
            expected: N,
            found: items.len(),
        });
    }
    let mut out = [0; N];
    for (slot, item) in out.iter_mut().zip(&items) {
        *slot = parse_i64(key, item)?;
    }
    Ok(out)
}

fn parse_flags<const N: usize>(key: &str, value: &Value) -> Result<[i64; N], OptionError> {
    let flags = parse_i64_array::<N>(key, value)?;
    for flag in flags {
        check(key, flag as f64, flag == 0 || flag == 1, "entries must be 0 or 1")?;
    }
    Ok(flags)
}

/// A scalar FWHM applies to all three axes
fn parse_fwhm(key: &str, value: &Value) -> Result<[f64; 3], OptionError> {
    if let Value::Number(_) = value {
        let v = parse_f64(key, value)?;
        return Ok([v, v, v]);
    }
    if let Value::String(s) = value {
        if let Ok(v) = s.trim().parse::<f64>() {
            return Ok([v, v, v]);
        }
    }
    parse_f64_array::<3>(key, value)
}

fn parse_affine_regularization(
    key: &str,
    value: &Value,
) -> Result<AffineRegularization, OptionError> {
    let s = parse_string(key, value)?;
    match s.to_lowercase().as_str() {
        "mni" => Ok(AffineRegularization::Mni),
        "eastern" => Ok(AffineRegularization::Eastern),
        "subj" => Ok(AffineRegularization::Subj),
        "none" | "" => Ok(AffineRegularization::Disabled),
        _ => Err(OptionError::InvalidType {
            key: key.to_string(),
            expected: "one of mni, eastern, subj, none",
            found: describe(value),
        }),
    }
}
