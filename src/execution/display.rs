//! Preview image for the response
//!
//! Renders sagittal, coronal and axial slices of a normalised volume side
//! by side as a greyscale PNG.

use crate::execution::ExecutionError;
use crate::toolkit::batch::prefixed;
use base64::{engine::general_purpose, Engine as _};
use image::{GrayImage, ImageFormat, Luma};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The first existing image named `<prefix><functional name>`, tried in
/// prefix order
pub fn find_display_image(functional: &Path, prefixes: &[&str]) -> Option<PathBuf> {
    prefixes
        .iter()
        .map(|prefix| prefixed(functional, prefix))
        .find(|candidate| candidate.is_file())
}

/// Slice index for a cut coordinate given as a voxel offset from the
/// volume centre. Out-of-range cuts fall back to the centre.
fn cut_index(offset: i64, len: usize) -> usize {
    let centre = (len / 2) as i64;
    let index = centre + offset;
    if index >= 0 && index < len as i64 {
        index as usize
    } else {
        centre as usize
    }
}

/// Render the first frame of `path` as PNG bytes
pub fn render_png(path: &Path, cut_coords: [i64; 3]) -> Result<Vec<u8>, ExecutionError> {
    let object = ReaderOptions::new().read_file(path)?;
    let data = object.into_volume().into_ndarray::<f32>()?;

    let shape = data.shape().to_vec();
    if shape.len() < 3 || shape[..3].iter().any(|d| *d == 0) {
        return Err(ExecutionError::Display(format!(
            "{} is not a 3D or 4D image (shape {:?})",
            path.display(),
            shape
        )));
    }
    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);
    let rank = shape.len();
    let voxel = |x: usize, y: usize, z: usize| -> Option<f32> {
        let mut index = vec![x, y, z];
        index.resize(rank, 0);
        data.get(index.as_slice()).copied().filter(|v| v.is_finite())
    };

    let cx = cut_index(cut_coords[0], nx);
    let cy = cut_index(cut_coords[1], ny);
    let cz = cut_index(cut_coords[2], nz);
    debug!("Rendering {} at voxel ({}, {}, {})", path.display(), cx, cy, cz);

    let width = ny + nx + nx;
    let height = nz.max(ny);
    let mut canvas: Vec<Option<f32>> = vec![None; width * height];

    // Superior and anterior point up
    for v in 0..nz {
        for u in 0..ny {
            canvas[v * width + u] = voxel(cx, u, nz - 1 - v);
        }
        for u in 0..nx {
            canvas[v * width + ny + u] = voxel(u, cy, nz - 1 - v);
        }
    }
    for v in 0..ny {
        for u in 0..nx {
            canvas[v * width + ny + nx + u] = voxel(u, ny - 1 - v, cz);
        }
    }

    let (min, max) = canvas
        .iter()
        .flatten()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let range = if max > min { max - min } else { 1.0 };

    let img = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let value = canvas[y as usize * width + x as usize]
            .map(|v| (((v - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8)
            .unwrap_or(0);
        Luma([value])
    });

    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Render `nifti` to `png_path` and return the PNG as base64
pub fn write_display(
    nifti: &Path,
    cut_coords: [i64; 3],
    png_path: &Path,
) -> Result<String, ExecutionError> {
    let bytes = render_png(nifti, cut_coords)?;
    std::fs::write(png_path, &bytes).map_err(|source| ExecutionError::Io {
        path: png_path.to_path_buf(),
        source,
    })?;
    Ok(general_purpose::STANDARD.encode(&bytes))
}
