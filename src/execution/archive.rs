//! Zip archive of the run outputs

use crate::execution::ExecutionError;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Entries this large need ZIP64 headers
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

fn needs_zip64(len: u64) -> bool {
    len >= ZIP64_THRESHOLD
}

/// Zip `entries` (files or directories, relative to `root`) into `zip_path`.
/// Archive names keep the paths relative to `root`.
pub fn zip_outputs(
    root: &Path,
    entries: &[PathBuf],
    zip_path: &Path,
) -> Result<PathBuf, ExecutionError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ExecutionError::Io { path, source }
    };

    let file = File::create(zip_path).map_err(io_err(zip_path))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let mut pending: Vec<PathBuf> = entries.iter().rev().cloned().collect();
    while let Some(relative) = pending.pop() {
        let path = root.join(&relative);
        if path == zip_path {
            continue;
        }
        let name = archive_name(&relative);

        if path.is_dir() {
            writer.add_directory(format!("{}/", name), options)?;
            let mut children: Vec<PathBuf> = std::fs::read_dir(&path)
                .map_err(io_err(&path))?
                .filter_map(|e| e.ok())
                .map(|e| relative.join(e.file_name()))
                .collect();
            // Popped in sorted order
            children.sort_by(|a, b| b.cmp(a));
            pending.extend(children);
        } else if path.is_file() {
            let len = path.metadata().map_err(io_err(&path))?.len();
            debug!("Archiving {} ({} bytes)", name, len);
            writer.start_file(name, options.large_file(needs_zip64(len)))?;
            let mut input = File::open(&path).map_err(io_err(&path))?;
            io::copy(&mut input, &mut writer).map_err(io_err(&path))?;
        }
    }

    writer.finish()?;
    Ok(zip_path.to_path_buf())
}

/// Forward-slash archive name for a relative path
fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
