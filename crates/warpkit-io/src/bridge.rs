//! Conversion between ITK transform records and in-memory transforms.
//!
//! Records describe transforms in the LPS frame with ITK's parameter
//! layouts; the in-memory model works in RAS. The readers here try the
//! known type names in a fixed order and say "not mine" cheaply, so a
//! file is classified by the first reader that recognizes it. Only
//! structurally broken data is a hard error.

use serde::{Deserialize, Serialize};

use warpkit_core::coordinate;
use warpkit_core::geometry::{compose_affine, linear_part, translation_part};
use warpkit_core::{
    BorderMode, GridData, InterpolationMode, LinearTransform, Matrix3, Matrix4, MessageLog,
    OrientedBSplineTransform, OrientedGridTransform, Result, ScalarPrecision, Transform,
    TransformChain, TransformError, Vector3, VectorGrid,
};

use crate::record::TransformRecord;

const AFFINE: &str = "AffineTransform";
const MATRIX_OFFSET: &str = "MatrixOffsetTransformBase";
const TRANSLATION: &str = "TranslationTransform";
const SCALE: &str = "ScaleTransform";
const IDENTITY: &str = "IdentityTransform";
const DISPLACEMENT_FIELD: &str = "DisplacementFieldTransform";
const INVERSE_DISPLACEMENT_FIELD: &str = "InverseDisplacementFieldTransform";
const BSPLINE_V4: &str = "BSplineTransform";
const INVERSE_BSPLINE_V4: &str = "InverseBSplineTransform";
const BSPLINE_V3: &str = "BSplineDeformableTransform";
const INVERSE_BSPLINE_V3: &str = "InverseBSplineDeformableTransform";
const COMPOSITE: &str = "CompositeTransform";

/// Size, origin, spacing and a row-major 3x3 direction matrix.
const GRID_FIXED_PARAMETER_COUNT: usize = 18;

/// Options controlling how transforms are serialized to records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    /// Write B-splines in the legacy ITKv3 form (a
    /// `BSplineDeformableTransform` followed by a bulk affine record)
    /// even when no bulk component is present.
    pub prefer_itkv3: bool,
}

struct TypeName<'a> {
    base: &'a str,
    precision: ScalarPrecision,
}

/// Split `Base_scalar_3[_3]` into its base name and scalar token.
/// Returns `None` for non-3D transforms and unknown scalar tokens, so
/// they fall through to the "unsupported type" diagnostics.
fn parse_type_name(name: &str) -> Option<TypeName<'_>> {
    let mut parts = name.split('_');
    let base = parts.next()?;
    let precision = match parts.next()? {
        "double" => ScalarPrecision::Double,
        "float" => ScalarPrecision::Float,
        _ => return None,
    };
    for dimension in parts {
        if dimension != "3" {
            return None;
        }
    }
    Some(TypeName { base, precision })
}

fn is_composite(record: &TransformRecord) -> bool {
    parse_type_name(&record.type_name).is_some_and(|t| t.base == COMPOSITE)
}

fn is_legacy_bspline(record: &TransformRecord) -> bool {
    parse_type_name(&record.type_name)
        .is_some_and(|t| t.base == BSPLINE_V3 || t.base == INVERSE_BSPLINE_V3)
}

/// Build one in-memory transform from the records of a transform file.
///
/// The records are in file order. Composite files list their
/// components in reverse application order (ITK appends to the front),
/// so they are reversed while building the chain.
pub fn transform_from_records(
    records: &[TransformRecord],
    log: &mut MessageLog,
) -> Result<Transform> {
    if records.is_empty() {
        return Err(TransformError::malformed("transform file contains no transforms"));
    }

    if is_composite(&records[0]) {
        return composite_from_records(records, log);
    }

    if records.len() == 1 {
        return single_from_record(&records[0], true, log)?.ok_or_else(|| {
            TransformError::unsupported(format!(
                "unsupported transform type '{}'",
                records[0].type_name
            ))
        });
    }

    // a legacy ITKv3 B-spline is stored as the spline record followed
    // by its bulk transform
    if records.len() == 2 {
        if let Some(mut spline) = bspline_from_record(&records[0], true)? {
            attach_bulk(&mut spline, &records[1])?;
            return Ok(Transform::BSpline(spline));
        }
    }

    Err(TransformError::malformed(format!(
        "{} transforms found without a composite transform container",
        records.len()
    )))
}

fn composite_from_records(
    records: &[TransformRecord],
    log: &mut MessageLog,
) -> Result<Transform> {
    if records.len() < 2 {
        return Err(TransformError::malformed("composite transform container is empty"));
    }
    let mut legs = Vec::with_capacity(records.len() - 1);
    for record in &records[1..] {
        if is_composite(record) {
            return Err(TransformError::unsupported(
                "nested composite transforms are not supported",
            ));
        }
        if is_legacy_bspline(record) {
            return Err(TransformError::unsupported(
                "legacy B-spline transforms cannot appear inside a composite transform",
            ));
        }
        let leg = single_from_record(record, false, log)?.ok_or_else(|| {
            TransformError::unsupported(format!(
                "unsupported transform type '{}' inside a composite transform",
                record.type_name
            ))
        })?;
        legs.push(leg);
    }
    legs.reverse();
    Ok(Transform::Composite(TransformChain::from_transforms(legs)))
}

/// Try every reader against one record, in priority order.
fn single_from_record(
    record: &TransformRecord,
    allow_legacy: bool,
    log: &mut MessageLog,
) -> Result<Option<Transform>> {
    if let Some(linear) = linear_from_record(record)? {
        return Ok(Some(Transform::Linear(linear)));
    }
    if let Some(grid) = grid_from_record(record)? {
        return Ok(Some(Transform::Grid(grid)));
    }
    if allow_legacy {
        if let Some(spline) = bspline_from_record(record, true)? {
            return Ok(Some(Transform::BSpline(spline)));
        }
    }
    if let Some(spline) = bspline_from_record(record, false)? {
        return Ok(Some(Transform::BSpline(spline)));
    }
    log.debug(format!(
        "no reader recognized transform type '{}'",
        record.type_name
    ));
    Ok(None)
}

fn expect_parameters(record: &TransformRecord, expected: usize) -> Result<()> {
    if record.parameters.len() != expected {
        return Err(TransformError::malformed(format!(
            "{} expects {} parameters, found {}",
            record.type_name,
            expected,
            record.parameters.len()
        )));
    }
    Ok(())
}

/// Fixed parameters of the matrix-based linear transforms hold the
/// center of rotation; an absent block means the origin.
fn fixed_center(record: &TransformRecord) -> Result<Vector3> {
    match record.fixed_parameters.len() {
        0 => Ok(Vector3::zeros()),
        3 => Ok(Vector3::new(
            record.fixed_parameters[0],
            record.fixed_parameters[1],
            record.fixed_parameters[2],
        )),
        n => Err(TransformError::malformed(format!(
            "{} expects 3 fixed parameters (center), found {}",
            record.type_name, n
        ))),
    }
}

fn linear_from_record(record: &TransformRecord) -> Result<Option<LinearTransform>> {
    let Some(type_name) = parse_type_name(&record.type_name) else {
        return Ok(None);
    };
    let lps = match type_name.base {
        AFFINE | MATRIX_OFFSET => {
            expect_parameters(record, 12)?;
            let matrix = Matrix3::from_row_slice(&record.parameters[0..9]);
            let translation = Vector3::new(
                record.parameters[9],
                record.parameters[10],
                record.parameters[11],
            );
            let center = fixed_center(record)?;
            // ITK stores the translation about the center of rotation
            let offset = translation + center - matrix * center;
            compose_affine(&matrix, &offset)
        }
        TRANSLATION => {
            expect_parameters(record, 3)?;
            let translation = Vector3::new(
                record.parameters[0],
                record.parameters[1],
                record.parameters[2],
            );
            compose_affine(&Matrix3::identity(), &translation)
        }
        SCALE => {
            expect_parameters(record, 3)?;
            let scales = Vector3::new(
                record.parameters[0],
                record.parameters[1],
                record.parameters[2],
            );
            let matrix = Matrix3::from_diagonal(&scales);
            let center = fixed_center(record)?;
            let offset = center - matrix * center;
            compose_affine(&matrix, &offset)
        }
        IDENTITY => Matrix4::identity(),
        _ => return Ok(None),
    };
    let ras = coordinate::matrix_lps_to_ras(&lps);
    Ok(Some(LinearTransform::new(ras)?))
}

/// Decode the common 18-value fixed parameter block of grid-backed
/// transforms: size, origin, spacing, then a row-major direction matrix,
/// all in LPS.
fn grid_geometry(record: &TransformRecord) -> Result<([usize; 3], Vector3, Vector3, Matrix3)> {
    let fixed = &record.fixed_parameters;
    if fixed.len() != GRID_FIXED_PARAMETER_COUNT {
        return Err(TransformError::malformed(format!(
            "{} expects {} fixed parameters, found {}",
            record.type_name,
            GRID_FIXED_PARAMETER_COUNT,
            fixed.len()
        )));
    }
    let mut dims = [0usize; 3];
    for axis in 0..3 {
        let size = fixed[axis];
        if size < 1.0 || size.fract() != 0.0 {
            return Err(TransformError::malformed(format!(
                "{} has invalid grid size {:?}",
                record.type_name,
                &fixed[0..3]
            )));
        }
        dims[axis] = size as usize;
    }
    let origin = Vector3::new(fixed[3], fixed[4], fixed[5]);
    let spacing = Vector3::new(fixed[6], fixed[7], fixed[8]);
    let direction = Matrix3::from_row_slice(&fixed[9..18]);
    Ok((dims, origin, spacing, direction))
}

fn grid_from_record(record: &TransformRecord) -> Result<Option<OrientedGridTransform>> {
    let Some(type_name) = parse_type_name(&record.type_name) else {
        return Ok(None);
    };
    let inverse = match type_name.base {
        INVERSE_DISPLACEMENT_FIELD => true,
        DISPLACEMENT_FIELD => false,
        _ => return Ok(None),
    };
    let (dims, origin, spacing, direction) = grid_geometry(record)?;
    let count = dims[0] * dims[1] * dims[2];
    expect_parameters(record, count * 3)?;

    // displacement vectors are stored interleaved (x y z per voxel)
    let data = match type_name.precision {
        ScalarPrecision::Double => GridData::F64(record.parameters.clone()),
        ScalarPrecision::Float => {
            GridData::F32(record.parameters.iter().map(|&v| v as f32).collect())
        }
    };
    let lps_grid = VectorGrid::new(dims, origin, spacing, direction, data)?;
    let mut transform = OrientedGridTransform::new(coordinate::grid_lps_to_ras(&lps_grid))?;
    transform.set_interpolation(InterpolationMode::Cubic);
    if inverse {
        transform.invert();
    }
    Ok(Some(transform))
}

fn bspline_from_record(
    record: &TransformRecord,
    legacy: bool,
) -> Result<Option<OrientedBSplineTransform>> {
    let Some(type_name) = parse_type_name(&record.type_name) else {
        return Ok(None);
    };
    let (forward_name, inverse_name) = if legacy {
        (BSPLINE_V3, INVERSE_BSPLINE_V3)
    } else {
        (BSPLINE_V4, INVERSE_BSPLINE_V4)
    };
    let inverse = if type_name.base == inverse_name {
        true
    } else if type_name.base == forward_name {
        false
    } else {
        return Ok(None);
    };
    let (dims, origin, spacing, direction) = grid_geometry(record)?;
    let count = dims[0] * dims[1] * dims[2];
    expect_parameters(record, count * 3)?;

    // coefficients are stored component-major: all x, then y, then z
    let interleave = |i: usize, p: &[f64]| [p[i], p[count + i], p[2 * count + i]];
    let data = match type_name.precision {
        ScalarPrecision::Double => {
            let mut buffer = Vec::with_capacity(count * 3);
            for i in 0..count {
                buffer.extend_from_slice(&interleave(i, &record.parameters));
            }
            GridData::F64(buffer)
        }
        ScalarPrecision::Float => {
            let mut buffer = Vec::with_capacity(count * 3);
            for i in 0..count {
                buffer.extend(interleave(i, &record.parameters).map(|v| v as f32));
            }
            GridData::F32(buffer)
        }
    };
    let lps_grid = VectorGrid::new(dims, origin, spacing, direction, data)?;
    let mut transform =
        OrientedBSplineTransform::new(coordinate::grid_lps_to_ras(&lps_grid))?;
    transform.set_border_mode(BorderMode::Zero);
    if inverse {
        transform.invert();
    }
    Ok(Some(transform))
}

/// Attach the second record of an ITKv3 pair as the bulk component.
fn attach_bulk(spline: &mut OrientedBSplineTransform, record: &TransformRecord) -> Result<()> {
    let base = parse_type_name(&record.type_name).map(|t| t.base);
    let lps = match base {
        Some(AFFINE) => {
            expect_parameters(record, 12)?;
            let matrix = Matrix3::from_row_slice(&record.parameters[0..9]);
            let translation = Vector3::new(
                record.parameters[9],
                record.parameters[10],
                record.parameters[11],
            );
            let center = fixed_center(record)?;
            let offset = translation + center - matrix * center;
            compose_affine(&matrix, &offset)
        }
        Some(IDENTITY) => Matrix4::identity(),
        _ => {
            return Err(TransformError::malformed(format!(
                "expected AffineTransform or IdentityTransform as the bulk component \
                 of a legacy B-spline, found '{}'",
                record.type_name
            )))
        }
    };
    spline.set_bulk(coordinate::matrix_lps_to_ras(&lps))
}

/// Serialize a transform into file-order records.
///
/// A multi-component transform becomes a composite container followed
/// by its flattened components in reverse application order.
pub fn records_from_transform(
    transform: &Transform,
    options: &WriteOptions,
    log: &mut MessageLog,
) -> Result<Vec<TransformRecord>> {
    let legs = transform.flattened();
    match legs.len() {
        0 => Err(TransformError::malformed("cannot write an empty transform")),
        1 => single_to_records(&legs[0], options, true),
        _ => {
            log.debug(format!(
                "writing {} components in a composite transform container",
                legs.len()
            ));
            let mut records = vec![TransformRecord::new(format!("{}_double_3_3", COMPOSITE))];
            for leg in legs.iter().rev() {
                records.extend(single_to_records(leg, options, false)?);
            }
            Ok(records)
        }
    }
}

fn single_to_records(
    transform: &Transform,
    options: &WriteOptions,
    allow_legacy: bool,
) -> Result<Vec<TransformRecord>> {
    match transform {
        Transform::Linear(linear) => Ok(vec![affine_record(
            linear.effective_matrix(),
            ScalarPrecision::Double,
        )]),
        Transform::Grid(grid) => Ok(vec![grid_record(grid)]),
        Transform::BSpline(spline) => bspline_records(spline, options, allow_legacy),
        Transform::Composite(_) => Err(TransformError::unsupported(
            "nested composite transforms cannot be written",
        )),
    }
}

fn scalar_token(precision: ScalarPrecision) -> &'static str {
    if precision.is_double() {
        "double"
    } else {
        "float"
    }
}

fn affine_record(ras: &Matrix4, precision: ScalarPrecision) -> TransformRecord {
    let lps = coordinate::matrix_ras_to_lps(ras);
    let linear = linear_part(&lps);
    let translation = translation_part(&lps);
    let mut parameters = Vec::with_capacity(12);
    for row in 0..3 {
        for col in 0..3 {
            parameters.push(linear[(row, col)]);
        }
    }
    parameters.extend_from_slice(translation.as_slice());
    TransformRecord {
        type_name: format!("{}_{}_3_3", AFFINE, scalar_token(precision)),
        parameters,
        fixed_parameters: vec![0.0, 0.0, 0.0],
    }
}

/// The 18 fixed parameters of a grid-backed record, from RAS geometry.
fn grid_fixed_parameters(grid: &VectorGrid) -> Vec<f64> {
    let origin = coordinate::vector_ras_to_lps(&grid.origin());
    let direction = coordinate::directions_ras_to_lps(&grid.direction());
    let spacing = grid.spacing();
    let dims = grid.dims();
    let mut fixed = Vec::with_capacity(GRID_FIXED_PARAMETER_COUNT);
    fixed.extend(dims.iter().map(|&d| d as f64));
    fixed.extend_from_slice(origin.as_slice());
    fixed.extend_from_slice(spacing.as_slice());
    for row in 0..3 {
        for col in 0..3 {
            fixed.push(direction[(row, col)]);
        }
    }
    fixed
}

fn data_as_f64(data: &GridData) -> Vec<f64> {
    match data {
        GridData::F32(v) => v.iter().map(|&s| s as f64).collect(),
        GridData::F64(v) => v.clone(),
    }
}

fn grid_record(transform: &OrientedGridTransform) -> TransformRecord {
    let grid = transform.grid();
    let scale = transform.displacement_scale();
    let shift = transform.displacement_shift();
    // fold the evaluation-time scale and shift into the stored vectors,
    // then flip the components to LPS
    let folded = grid.data().map_scalars(|i, s| {
        let v = scale * s + shift;
        if i % 3 == 2 {
            v
        } else {
            -v
        }
    });
    let base = if transform.inverse_flag() {
        INVERSE_DISPLACEMENT_FIELD
    } else {
        DISPLACEMENT_FIELD
    };
    TransformRecord {
        // displacement fields are always written in double precision
        type_name: format!("{}_double_3_3", base),
        parameters: data_as_f64(&folded),
        fixed_parameters: grid_fixed_parameters(grid),
    }
}

fn bspline_records(
    spline: &OrientedBSplineTransform,
    options: &WriteOptions,
    allow_legacy: bool,
) -> Result<Vec<TransformRecord>> {
    let write_legacy = options.prefer_itkv3 || spline.bulk().is_some();
    if write_legacy && !allow_legacy {
        if spline.bulk().is_some_and(|b| *b != Matrix4::identity()) {
            return Err(TransformError::unsupported(
                "a B-spline transform with a bulk component cannot be stored \
                 inside a composite transform",
            ));
        }
        return Ok(vec![spline_coefficient_record(spline, false)]);
    }
    if write_legacy {
        let bulk = spline.bulk().copied().unwrap_or_else(Matrix4::identity);
        Ok(vec![
            spline_coefficient_record(spline, true),
            affine_record(&bulk, spline.coefficients().precision()),
        ])
    } else {
        Ok(vec![spline_coefficient_record(spline, false)])
    }
}

fn spline_coefficient_record(
    spline: &OrientedBSplineTransform,
    legacy: bool,
) -> TransformRecord {
    let grid = spline.coefficients();
    let scale = spline.displacement_scale();
    let count = grid.vector_count();
    let interleaved = data_as_f64(grid.data());
    // component-major layout with the first two components flipped to LPS
    let mut parameters = vec![0.0; count * 3];
    for (voxel, chunk) in interleaved.chunks_exact(3).enumerate() {
        parameters[voxel] = -(scale * chunk[0]);
        parameters[count + voxel] = -(scale * chunk[1]);
        parameters[2 * count + voxel] = scale * chunk[2];
    }
    let base = match (legacy, spline.inverse_flag()) {
        (true, false) => BSPLINE_V3,
        (true, true) => INVERSE_BSPLINE_V3,
        (false, false) => BSPLINE_V4,
        (false, true) => INVERSE_BSPLINE_V4,
    };
    TransformRecord {
        type_name: format!("{}_{}_3_3", base, scalar_token(grid.precision())),
        parameters,
        fixed_parameters: grid_fixed_parameters(grid),
    }
}
