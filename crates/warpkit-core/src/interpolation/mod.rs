//! Interpolation of displacement vectors at continuous voxel indices.
//!
//! All kernels take a continuous index in voxel space (the caller maps
//! world coordinates through the grid's world-to-index matrix first)
//! and return vectors in `f64` regardless of the storage precision.
//! Derivatives are taken with respect to the continuous index; mapping
//! them back to world space is the caller's job.

pub mod bspline;
mod cubic;
mod linear;
mod nearest;

use crate::geometry::{Matrix3, Vector3};
use crate::grid::{GridData, VectorGrid};

/// Kernel used when resampling a displacement grid between voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationMode {
    Nearest,
    #[default]
    Linear,
    Cubic,
}

/// Sample the grid at a continuous voxel index.
///
/// Indices outside the grid are clamped to the boundary, so the field
/// extends constantly past its edges.
pub fn sample(grid: &VectorGrid, index: &Vector3, mode: InterpolationMode) -> Vector3 {
    let dims = grid.dims();
    match (mode, grid.data()) {
        (InterpolationMode::Nearest, GridData::F32(v)) => nearest::sample(dims, v, index),
        (InterpolationMode::Nearest, GridData::F64(v)) => nearest::sample(dims, v, index),
        (InterpolationMode::Linear, GridData::F32(v)) => linear::sample(dims, v, index),
        (InterpolationMode::Linear, GridData::F64(v)) => linear::sample(dims, v, index),
        (InterpolationMode::Cubic, GridData::F32(v)) => cubic::sample(dims, v, index),
        (InterpolationMode::Cubic, GridData::F64(v)) => cubic::sample(dims, v, index),
    }
}

/// Sample the grid and the partial derivatives of each vector component
/// with respect to the continuous index (row = component, column = axis).
///
/// Nearest-neighbour interpolation is piecewise constant, so its
/// derivative is reported as zero.
pub fn sample_with_derivative(
    grid: &VectorGrid,
    index: &Vector3,
    mode: InterpolationMode,
) -> (Vector3, Matrix3) {
    let dims = grid.dims();
    match (mode, grid.data()) {
        (InterpolationMode::Nearest, GridData::F32(v)) => {
            (nearest::sample(dims, v, index), Matrix3::zeros())
        }
        (InterpolationMode::Nearest, GridData::F64(v)) => {
            (nearest::sample(dims, v, index), Matrix3::zeros())
        }
        (InterpolationMode::Linear, GridData::F32(v)) => {
            linear::sample_with_derivative(dims, v, index)
        }
        (InterpolationMode::Linear, GridData::F64(v)) => {
            linear::sample_with_derivative(dims, v, index)
        }
        (InterpolationMode::Cubic, GridData::F32(v)) => {
            cubic::sample_with_derivative(dims, v, index)
        }
        (InterpolationMode::Cubic, GridData::F64(v)) => {
            cubic::sample_with_derivative(dims, v, index)
        }
    }
}

#[inline]
fn vector_at<T: crate::grid::GridScalar>(
    dims: [usize; 3],
    data: &[T],
    i: usize,
    j: usize,
    k: usize,
) -> Vector3 {
    let o = ((k * dims[1] + j) * dims[0] + i) * 3;
    Vector3::new(data[o].to_f64(), data[o + 1].to_f64(), data[o + 2].to_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Matrix3 as M3;
    use crate::grid::VectorGrid;
    use approx::assert_relative_eq;

    /// Grid whose samples hold `(x + y, 2z, -x)` at each voxel.
    fn ramp_grid() -> VectorGrid {
        let dims = [4, 4, 4];
        let mut grid = VectorGrid::zeros(
            dims,
            crate::geometry::Vector3::zeros(),
            crate::geometry::Vector3::new(1.0, 1.0, 1.0),
            M3::identity(),
        )
        .unwrap();
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    grid.set_vector_at(
                        [i, j, k],
                        Vector3::new((i + j) as f64, 2.0 * k as f64, -(i as f64)),
                    );
                }
            }
        }
        grid
    }

    #[test]
    fn test_linear_reproduces_affine_field() {
        let grid = ramp_grid();
        let idx = Vector3::new(1.25, 2.5, 0.75);
        let v = sample(&grid, &idx, InterpolationMode::Linear);
        assert_relative_eq!(v.x, 3.75, epsilon = 1e-12);
        assert_relative_eq!(v.y, 1.5, epsilon = 1e-12);
        assert_relative_eq!(v.z, -1.25, epsilon = 1e-12);
    }

    #[test]
    fn test_cubic_reproduces_affine_field_in_interior() {
        let grid = ramp_grid();
        let idx = Vector3::new(1.5, 1.25, 1.75);
        let v = sample(&grid, &idx, InterpolationMode::Cubic);
        assert_relative_eq!(v.x, 2.75, epsilon = 1e-10);
        assert_relative_eq!(v.y, 3.5, epsilon = 1e-10);
        assert_relative_eq!(v.z, -1.5, epsilon = 1e-10);
    }

    #[test]
    fn test_nearest_picks_closest_voxel() {
        let grid = ramp_grid();
        let v = sample(&grid, &Vector3::new(1.4, 2.6, 0.2), InterpolationMode::Nearest);
        assert_eq!(v, Vector3::new(4.0, 0.0, -1.0));
    }

    #[test]
    fn test_out_of_bounds_clamps_to_edge() {
        let grid = ramp_grid();
        for mode in [
            InterpolationMode::Nearest,
            InterpolationMode::Linear,
            InterpolationMode::Cubic,
        ] {
            let v = sample(&grid, &Vector3::new(-5.0, 10.0, 1.0), mode);
            assert_relative_eq!(v.x, 3.0, epsilon = 1e-10);
            assert_relative_eq!(v.y, 2.0, epsilon = 1e-10);
            assert_relative_eq!(v.z, 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_derivatives_match_central_differences() {
        let grid = ramp_grid();
        let idx = Vector3::new(1.3, 1.7, 1.4);
        let h = 1e-5;
        for mode in [InterpolationMode::Linear, InterpolationMode::Cubic] {
            let (_, deriv) = sample_with_derivative(&grid, &idx, mode);
            for axis in 0..3 {
                let mut lo = idx;
                let mut hi = idx;
                lo[axis] -= h;
                hi[axis] += h;
                let num = (sample(&grid, &hi, mode) - sample(&grid, &lo, mode)) / (2.0 * h);
                for comp in 0..3 {
                    assert_relative_eq!(deriv[(comp, axis)], num[comp], epsilon = 1e-5);
                }
            }
        }
    }
}
