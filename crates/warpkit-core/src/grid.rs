//! Regular 3D grids of displacement vectors with world-space orientation.
//!
//! A [`VectorGrid`] stores one 3-vector per voxel together with the
//! origin, spacing and direction cosines that place voxel indices in
//! world space. Sample storage keeps the scalar precision of its source
//! (`f32` or `f64`) so that files round-trip without widening.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransformError};
use crate::geometry::{compose_affine, Matrix3, Matrix4, Vector3};

/// Scalar precision of stored grid samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarPrecision {
    Float,
    Double,
}

impl ScalarPrecision {
    pub fn is_double(self) -> bool {
        matches!(self, ScalarPrecision::Double)
    }
}

/// Scalar type that can live in a [`GridData`] buffer.
///
/// Interpolation kernels are generic over this trait and do their
/// arithmetic in `f64` regardless of the storage precision.
pub trait GridScalar: Copy + std::fmt::Debug + 'static {
    const PRECISION: ScalarPrecision;

    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
}

impl GridScalar for f32 {
    const PRECISION: ScalarPrecision = ScalarPrecision::Float;

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl GridScalar for f64 {
    const PRECISION: ScalarPrecision = ScalarPrecision::Double;

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(v: f64) -> Self {
        v
    }
}

/// Vector samples in their source precision, interleaved as x,y,z per voxel.
#[derive(Debug, Clone, PartialEq)]
pub enum GridData {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl GridData {
    /// Number of 3-vectors held in the buffer.
    pub fn vector_count(&self) -> usize {
        match self {
            GridData::F32(v) => v.len() / 3,
            GridData::F64(v) => v.len() / 3,
        }
    }

    pub fn scalar_count(&self) -> usize {
        match self {
            GridData::F32(v) => v.len(),
            GridData::F64(v) => v.len(),
        }
    }

    pub fn precision(&self) -> ScalarPrecision {
        match self {
            GridData::F32(_) => ScalarPrecision::Float,
            GridData::F64(_) => ScalarPrecision::Double,
        }
    }

    /// Map every scalar through `f`, keeping the storage precision.
    pub fn map_scalars(&self, mut f: impl FnMut(usize, f64) -> f64) -> GridData {
        match self {
            GridData::F32(v) => GridData::F32(
                v.iter().enumerate().map(|(i, &s)| f(i, s as f64) as f32).collect(),
            ),
            GridData::F64(v) => {
                GridData::F64(v.iter().enumerate().map(|(i, &s)| f(i, s)).collect())
            }
        }
    }
}

/// A dense grid of displacement vectors oriented in world space.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorGrid {
    dims: [usize; 3],
    origin: Vector3,
    spacing: Vector3,
    direction: Matrix3,
    data: GridData,
}

impl VectorGrid {
    /// Create a grid, validating that the sample buffer matches `dims`
    /// and that every spacing component is non-zero.
    pub fn new(
        dims: [usize; 3],
        origin: Vector3,
        spacing: Vector3,
        direction: Matrix3,
        data: GridData,
    ) -> Result<Self> {
        let expected = dims[0]
            .checked_mul(dims[1])
            .and_then(|n| n.checked_mul(dims[2]))
            .ok_or_else(|| TransformError::malformed("grid dimensions overflow"))?;
        if dims.iter().any(|&d| d == 0) {
            return Err(TransformError::malformed(format!(
                "grid dimensions must be positive, got {:?}",
                dims
            )));
        }
        if data.vector_count() != expected || data.scalar_count() != expected * 3 {
            return Err(TransformError::malformed(format!(
                "grid of {:?} needs {} vector samples, buffer holds {}",
                dims,
                expected,
                data.vector_count()
            )));
        }
        if spacing.iter().any(|&s| s == 0.0) {
            return Err(TransformError::malformed(format!(
                "grid spacing must be non-zero, got {:?}",
                spacing
            )));
        }
        Ok(Self { dims, origin, spacing, direction, data })
    }

    /// Zero-filled `f64` grid, mostly useful for tests and synthesis.
    pub fn zeros(
        dims: [usize; 3],
        origin: Vector3,
        spacing: Vector3,
        direction: Matrix3,
    ) -> Result<Self> {
        let count = dims[0] * dims[1] * dims[2] * 3;
        Self::new(dims, origin, spacing, direction, GridData::F64(vec![0.0; count]))
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn origin(&self) -> Vector3 {
        self.origin
    }

    pub fn spacing(&self) -> Vector3 {
        self.spacing
    }

    pub fn direction(&self) -> Matrix3 {
        self.direction
    }

    pub fn data(&self) -> &GridData {
        &self.data
    }

    pub fn precision(&self) -> ScalarPrecision {
        self.data.precision()
    }

    pub fn vector_count(&self) -> usize {
        self.data.vector_count()
    }

    fn offset(&self, index: [usize; 3]) -> usize {
        ((index[2] * self.dims[1] + index[1]) * self.dims[0] + index[0]) * 3
    }

    /// Read the vector at an integer voxel index, widened to `f64`.
    pub fn vector_at(&self, index: [usize; 3]) -> Vector3 {
        let o = self.offset(index);
        match &self.data {
            GridData::F32(v) => {
                Vector3::new(v[o] as f64, v[o + 1] as f64, v[o + 2] as f64)
            }
            GridData::F64(v) => Vector3::new(v[o], v[o + 1], v[o + 2]),
        }
    }

    /// Overwrite the vector at an integer voxel index.
    pub fn set_vector_at(&mut self, index: [usize; 3], value: Vector3) {
        let o = self.offset(index);
        match &mut self.data {
            GridData::F32(v) => {
                v[o] = value.x as f32;
                v[o + 1] = value.y as f32;
                v[o + 2] = value.z as f32;
            }
            GridData::F64(v) => {
                v[o] = value.x;
                v[o + 1] = value.y;
                v[o + 2] = value.z;
            }
        }
    }

    /// Homogeneous matrix mapping voxel indices to world coordinates.
    pub fn index_to_world(&self) -> Matrix4 {
        let scaled = self.direction * Matrix3::from_diagonal(&self.spacing);
        compose_affine(&scaled, &self.origin)
    }

    /// Inverse of [`Self::index_to_world`], or an error when the
    /// direction matrix is singular.
    pub fn world_to_index(&self) -> Result<Matrix4> {
        let fwd = self.index_to_world();
        fwd.try_inverse().ok_or_else(|| {
            TransformError::singular(format!(
                "direction matrix {:?} with spacing {:?} is not invertible",
                self.direction, self.spacing
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::apply_affine;
    use crate::geometry::Point3;
    use approx::assert_relative_eq;

    fn axis_aligned_grid() -> VectorGrid {
        VectorGrid::zeros(
            [3, 4, 5],
            Vector3::new(10.0, -20.0, 5.0),
            Vector3::new(2.0, 2.0, 3.0),
            Matrix3::identity(),
        )
        .unwrap()
    }

    #[test]
    fn test_size_validation() {
        let bad = VectorGrid::new(
            [2, 2, 2],
            Vector3::zeros(),
            Vector3::new(1.0, 1.0, 1.0),
            Matrix3::identity(),
            GridData::F64(vec![0.0; 9]),
        );
        assert!(matches!(bad, Err(TransformError::MalformedData(_))));
    }

    #[test]
    fn test_zero_spacing_rejected() {
        let bad = VectorGrid::zeros(
            [2, 2, 2],
            Vector3::zeros(),
            Vector3::new(1.0, 0.0, 1.0),
            Matrix3::identity(),
        );
        assert!(matches!(bad, Err(TransformError::MalformedData(_))));
    }

    #[test]
    fn test_index_world_round_trip() {
        let grid = axis_aligned_grid();
        let fwd = grid.index_to_world();
        let inv = grid.world_to_index().unwrap();

        let p = apply_affine(&fwd, &Point3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(p.x, 12.0);
        assert_relative_eq!(p.y, -16.0);
        assert_relative_eq!(p.z, 14.0);

        let back = apply_affine(&inv, &p);
        assert_relative_eq!(back.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(back.y, 2.0, epsilon = 1e-12);
        assert_relative_eq!(back.z, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_direction_is_an_error() {
        let mut direction = Matrix3::identity();
        direction[(2, 2)] = 0.0;
        let grid = VectorGrid::zeros(
            [2, 2, 2],
            Vector3::zeros(),
            Vector3::new(1.0, 1.0, 1.0),
            direction,
        )
        .unwrap();
        assert!(matches!(
            grid.world_to_index(),
            Err(TransformError::SingularGridDirections(_))
        ));
    }

    #[test]
    fn test_sample_access_keeps_precision() {
        let mut grid = VectorGrid::new(
            [1, 1, 2],
            Vector3::zeros(),
            Vector3::new(1.0, 1.0, 1.0),
            Matrix3::identity(),
            GridData::F32(vec![0.0; 6]),
        )
        .unwrap();
        grid.set_vector_at([0, 0, 1], Vector3::new(1.5, -2.5, 3.0));
        assert_eq!(grid.precision(), ScalarPrecision::Float);
        assert_eq!(grid.vector_at([0, 0, 1]), Vector3::new(1.5, -2.5, 3.0));
        assert_eq!(grid.vector_at([0, 0, 0]), Vector3::zeros());
    }
}
