//! File-level entry points: pick a format by extension, read or write,
//! and normalize what was read.

use std::path::Path;

use anyhow::{bail, Context, Result};

use warpkit_core::{MessageLog, Transform, TransformError};

use crate::bridge::{self, WriteOptions};
use crate::field_image;
use crate::record;

/// True for displacement-field image formats.
pub fn is_image_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    name.ends_with(".nii") || name.ends_with(".nii.gz")
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Read a transform of any supported format.
///
/// After reading, a transform whose warp components were all stored
/// inverted is flipped once as a whole, so callers always see the
/// forward direction.
pub fn read_transform(path: &Path, log: &mut MessageLog) -> Result<Transform> {
    let transform = if is_image_file(path) {
        Transform::Grid(field_image::read_field_image(path, log)?)
    } else if has_extension(path, "h5") {
        bail!(
            "{}: HDF5 transform containers are not supported; \
             save the transform as .tfm or .txt instead",
            path.display()
        );
    } else {
        let records = record::read_transform_file(path)?;
        bridge::transform_from_records(&records, log)
            .with_context(|| format!("failed to convert {}", path.display()))?
    };
    Ok(normalize_inverted_warps(transform, log))
}

/// Write a transform in the format implied by the extension.
pub fn write_transform(
    path: &Path,
    transform: &Transform,
    options: &WriteOptions,
    log: &mut MessageLog,
) -> Result<()> {
    if is_image_file(path) {
        let Transform::Grid(grid) = transform else {
            bail!(
                "{}: only displacement grid transforms can be written as an image; \
                 save the transform as .tfm or .txt instead",
                path.display()
            );
        };
        if grid.inverse_flag() {
            return Err(TransformError::unsupported(
                "an image file cannot represent a computed inverse of a displacement \
                 field; convert the transform to its forward form first",
            ))
            .with_context(|| format!("failed to write {}", path.display()));
        }
        return field_image::write_field_image(path, grid, log);
    }
    let records = bridge::records_from_transform(transform, options, log)
        .with_context(|| format!("failed to convert {}", path.display()))?;
    record::write_transform_file(path, &records)
}

/// If every warp component of the transform carries the inverse flag,
/// invert the whole transform once instead, leaving the flags clear.
fn normalize_inverted_warps(transform: Transform, log: &mut MessageLog) -> Transform {
    let warp_flags: Vec<bool> = transform
        .flattened()
        .iter()
        .filter(|t| t.is_warp())
        .map(|t| t.inverse_flag())
        .collect();
    if !warp_flags.is_empty() && warp_flags.iter().all(|&f| f) {
        log.debug(
            "all warp components were stored inverted; normalizing the whole \
             transform to its forward direction",
        );
        transform.inverted()
    } else {
        transform
    }
}
