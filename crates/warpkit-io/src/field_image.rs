//! Displacement fields stored as NIfTI vector images.
//!
//! The image voxels hold LPS displacement vectors (the ITK image
//! convention) while the NIfTI header places voxels in RAS, so the
//! world rows of the affine are flipped in both directions on top of
//! the usual frame conversion of the vectors themselves.

use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::Array5;
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use warpkit_core::coordinate;
use warpkit_core::geometry::{compose_affine, linear_part, translation_part};
use warpkit_core::{
    GridData, InterpolationMode, Matrix3, Matrix4, MessageLog, OrientedGridTransform,
    ScalarPrecision, Vector3, VectorGrid,
};

/// NIFTI_INTENT_DISPVECT
const DISPLACEMENT_INTENT: i16 = 1006;
/// NIfTI datatype code for 32-bit floats.
const DT_FLOAT32: i16 = 16;

/// Read a NIfTI vector image as a displacement grid transform.
pub fn read_field_image(path: &Path, log: &mut MessageLog) -> Result<OrientedGridTransform> {
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("failed to read NIfTI image {}", path.display()))?;
    let header = obj.header().clone();
    if header.intent_code != DISPLACEMENT_INTENT {
        log.warning(format!(
            "{}: intent code {} does not mark a displacement vector field; \
             interpreting the voxels as displacements anyway",
            path.display(),
            header.intent_code
        ));
    }

    let index_to_ras = affine_from_header(&header);
    // the stored image is an ITK LPS image
    let index_to_lps = negate_world_rows(&index_to_ras);
    let (origin, spacing, direction) = decompose_affine(&index_to_lps)?;
    let precision = if header.datatype == DT_FLOAT32 {
        ScalarPrecision::Float
    } else {
        ScalarPrecision::Double
    };

    let array = obj
        .into_volume()
        .into_ndarray::<f64>()
        .context("failed to decode NIfTI voxel data")?;
    let shape = array.shape().to_vec();
    let (dims, buffer) = match shape.as_slice() {
        &[nx, ny, nz, 1, 3] => {
            let array = array
                .into_dimensionality::<ndarray::Ix5>()
                .context("failed to view displacement image as 5-D")?;
            let mut buffer = Vec::with_capacity(nx * ny * nz * 3);
            for k in 0..nz {
                for j in 0..ny {
                    for i in 0..nx {
                        for c in 0..3 {
                            buffer.push(array[[i, j, k, 0, c]]);
                        }
                    }
                }
            }
            ([nx, ny, nz], buffer)
        }
        &[nx, ny, nz, 3] => {
            let array = array
                .into_dimensionality::<ndarray::Ix4>()
                .context("failed to view displacement image as 4-D")?;
            let mut buffer = Vec::with_capacity(nx * ny * nz * 3);
            for k in 0..nz {
                for j in 0..ny {
                    for i in 0..nx {
                        for c in 0..3 {
                            buffer.push(array[[i, j, k, c]]);
                        }
                    }
                }
            }
            ([nx, ny, nz], buffer)
        }
        other => bail!(
            "displacement image must be [x, y, z, 1, 3] or [x, y, z, 3], found {:?}",
            other
        ),
    };

    let data = match precision {
        ScalarPrecision::Float => GridData::F32(buffer.iter().map(|&v| v as f32).collect()),
        ScalarPrecision::Double => GridData::F64(buffer),
    };
    let lps_grid = VectorGrid::new(dims, origin, spacing, direction, data)?;
    let mut transform = OrientedGridTransform::new(coordinate::grid_lps_to_ras(&lps_grid))?;
    transform.set_interpolation(InterpolationMode::Cubic);
    Ok(transform)
}

/// Write a displacement grid transform as a NIfTI vector image.
///
/// The evaluation-time scale and shift are folded into the stored
/// vectors, the same folding as for transform files.
pub fn write_field_image(
    path: &Path,
    transform: &OrientedGridTransform,
    log: &mut MessageLog,
) -> Result<()> {
    let grid = transform.grid();
    let dims = grid.dims();
    log.debug(format!(
        "writing {}x{}x{} displacement field to {}",
        dims[0],
        dims[1],
        dims[2],
        path.display()
    ));
    let scale = transform.displacement_scale();
    let shift = transform.displacement_shift();
    let folded = grid.data().map_scalars(|i, s| {
        let v = scale * s + shift;
        if i % 3 == 2 {
            v
        } else {
            -v
        }
    });

    let origin = coordinate::vector_ras_to_lps(&grid.origin());
    let direction = coordinate::directions_ras_to_lps(&grid.direction());
    let spacing = grid.spacing();
    let index_to_lps = compose_affine(&(direction * Matrix3::from_diagonal(&spacing)), &origin);
    let index_to_ras = negate_world_rows(&index_to_lps);

    let [nx, ny, nz] = grid.dims();
    let mut header = NiftiHeader::default();
    header.dim = [5, nx as u16, ny as u16, nz as u16, 1, 3, 1, 1];
    header.pixdim = [
        1.0,
        spacing.x as f32,
        spacing.y as f32,
        spacing.z as f32,
        1.0,
        1.0,
        1.0,
        1.0,
    ];
    header.intent_code = DISPLACEMENT_INTENT;
    header.sform_code = 1;
    header.srow_x = affine_row(&index_to_ras, 0);
    header.srow_y = affine_row(&index_to_ras, 1);
    header.srow_z = affine_row(&index_to_ras, 2);
    // spatial units: millimetres
    header.xyzt_units = 2;

    let shape = (nx, ny, nz, 1, 3);
    let sample = |i: usize, j: usize, k: usize, c: usize| ((k * ny + j) * nx + i) * 3 + c;
    match folded {
        GridData::F32(values) => {
            let array =
                Array5::from_shape_fn(shape, |(i, j, k, _, c)| values[sample(i, j, k, c)]);
            WriterOptions::new(path)
                .reference_header(&header)
                .write_nifti(&array)
                .map_err(|e| anyhow::anyhow!("failed to write NIfTI image: {}", e))?;
        }
        GridData::F64(values) => {
            let array =
                Array5::from_shape_fn(shape, |(i, j, k, _, c)| values[sample(i, j, k, c)]);
            WriterOptions::new(path)
                .reference_header(&header)
                .write_nifti(&array)
                .map_err(|e| anyhow::anyhow!("failed to write NIfTI image: {}", e))?;
        }
    }
    Ok(())
}

/// Index-to-world affine from the header: sform, then qform, then a
/// plain pixdim scaling.
fn affine_from_header(header: &NiftiHeader) -> Matrix4 {
    if header.sform_code > 0 {
        let mut m = Matrix4::identity();
        for (row, values) in [header.srow_x, header.srow_y, header.srow_z]
            .iter()
            .enumerate()
        {
            for col in 0..4 {
                m[(row, col)] = values[col] as f64;
            }
        }
        m
    } else if header.qform_code > 0 {
        let b = header.quatern_b as f64;
        let c = header.quatern_c as f64;
        let d = header.quatern_d as f64;
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
        let qfac = if header.pixdim[0] == 0.0 { 1.0 } else { header.pixdim[0] as f64 };

        let rotation = Matrix3::new(
            a * a + b * b - c * c - d * d,
            2.0 * b * c - 2.0 * a * d,
            2.0 * b * d + 2.0 * a * c,
            2.0 * b * c + 2.0 * a * d,
            a * a + c * c - b * b - d * d,
            2.0 * c * d - 2.0 * a * b,
            2.0 * b * d - 2.0 * a * c,
            2.0 * c * d + 2.0 * a * b,
            a * a + d * d - c * c - b * b,
        );
        let scales = Vector3::new(
            header.pixdim[1] as f64,
            header.pixdim[2] as f64,
            header.pixdim[3] as f64 * qfac,
        );
        let translation = Vector3::new(
            header.quatern_x as f64,
            header.quatern_y as f64,
            header.quatern_z as f64,
        );
        compose_affine(&(rotation * Matrix3::from_diagonal(&scales)), &translation)
    } else {
        let scales = Vector3::new(
            header.pixdim[1] as f64,
            header.pixdim[2] as f64,
            header.pixdim[3] as f64,
        );
        compose_affine(&Matrix3::from_diagonal(&scales), &Vector3::zeros())
    }
}

/// Negate the first two world rows, swapping between RAS and LPS.
fn negate_world_rows(m: &Matrix4) -> Matrix4 {
    let mut out = *m;
    for row in 0..2 {
        for col in 0..4 {
            out[(row, col)] = -out[(row, col)];
        }
    }
    out
}

/// Split an index-to-world affine into origin, spacing (column norms)
/// and normalized direction columns.
fn decompose_affine(m: &Matrix4) -> Result<(Vector3, Vector3, Matrix3)> {
    let linear = linear_part(m);
    let origin = translation_part(m);
    let mut spacing = Vector3::zeros();
    let mut direction = Matrix3::identity();
    for axis in 0..3 {
        let column = linear.column(axis);
        let norm = column.norm();
        if norm < 1e-9 {
            bail!("NIfTI affine has a zero-length voxel axis {}", axis);
        }
        spacing[axis] = norm;
        direction.set_column(axis, &(column / norm));
    }
    Ok((origin, spacing, direction))
}

fn affine_row(m: &Matrix4, row: usize) -> [f32; 4] {
    [
        m[(row, 0)] as f32,
        m[(row, 1)] as f32,
        m[(row, 2)] as f32,
        m[(row, 3)] as f32,
    ]
}
