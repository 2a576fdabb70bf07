//! Cubic B-spline evaluation over a coefficient grid.
//!
//! Unlike the kernels in the sibling modules this one is approximating:
//! the grid holds spline coefficients, not displacement samples, and
//! the field value at a knot is a blend of the surrounding 4x4x4
//! coefficients. Used by free-form deformation transforms.

use crate::geometry::{Matrix3, Vector3};
use crate::grid::{GridData, GridScalar, VectorGrid};

/// What the spline does outside its coefficient support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorderMode {
    /// Repeat the boundary coefficients outward (constant extension).
    #[default]
    Edge,
    /// Treat out-of-range coefficients as zero, so the deformation
    /// fades to nothing away from the modelled region.
    Zero,
}

/// Cubic B-spline basis weights for a fraction `f` in `[0, 1)`.
///
/// `weights[m]` multiplies the coefficient at node `floor(u) - 1 + m`.
pub fn weights(f: f64) -> [f64; 4] {
    let f2 = f * f;
    let f3 = f2 * f;
    let g = 1.0 - f;
    [
        g * g * g / 6.0,
        (3.0 * f3 - 6.0 * f2 + 4.0) / 6.0,
        (-3.0 * f3 + 3.0 * f2 + 3.0 * f + 1.0) / 6.0,
        f3 / 6.0,
    ]
}

/// Derivatives of [`weights`] with respect to `f`.
pub fn derivative_weights(f: f64) -> [f64; 4] {
    let f2 = f * f;
    let g = 1.0 - f;
    [
        -g * g / 2.0,
        (3.0 * f2 - 4.0 * f) / 2.0,
        (-3.0 * f2 + 2.0 * f + 1.0) / 2.0,
        f2 / 2.0,
    ]
}

/// Evaluate the spline at a continuous voxel index of the coefficient grid.
pub fn sample(grid: &VectorGrid, index: &Vector3, border: BorderMode) -> Vector3 {
    match grid.data() {
        GridData::F32(v) => accumulate(grid.dims(), v, index, border, false).0,
        GridData::F64(v) => accumulate(grid.dims(), v, index, border, false).0,
    }
}

/// Evaluate the spline and its index-space derivative
/// (row = component, column = axis).
pub fn sample_with_derivative(
    grid: &VectorGrid,
    index: &Vector3,
    border: BorderMode,
) -> (Vector3, Matrix3) {
    match grid.data() {
        GridData::F32(v) => accumulate(grid.dims(), v, index, border, true),
        GridData::F64(v) => accumulate(grid.dims(), v, index, border, true),
    }
}

struct Axis {
    base: isize,
    weights: [f64; 4],
    dweights: [f64; 4],
}

fn axis(u: f64) -> Axis {
    let floor = u.floor();
    let frac = u - floor;
    Axis {
        base: floor as isize - 1,
        weights: weights(frac),
        dweights: derivative_weights(frac),
    }
}

fn node(idx: isize, n: usize, border: BorderMode) -> Option<usize> {
    if (0..n as isize).contains(&idx) {
        Some(idx as usize)
    } else {
        match border {
            BorderMode::Edge => Some(idx.clamp(0, n as isize - 1) as usize),
            BorderMode::Zero => None,
        }
    }
}

fn accumulate<T: GridScalar>(
    dims: [usize; 3],
    data: &[T],
    index: &Vector3,
    border: BorderMode,
    with_derivative: bool,
) -> (Vector3, Matrix3) {
    let ax = axis(index.x);
    let ay = axis(index.y);
    let az = axis(index.z);

    let mut value = Vector3::zeros();
    let mut deriv = Matrix3::zeros();
    for mz in 0..4 {
        let Some(k) = node(az.base + mz as isize, dims[2], border) else { continue };
        for my in 0..4 {
            let Some(j) = node(ay.base + my as isize, dims[1], border) else { continue };
            for mx in 0..4 {
                let Some(i) = node(ax.base + mx as isize, dims[0], border) else { continue };
                let v = super::vector_at(dims, data, i, j, k);
                value += v * (ax.weights[mx] * ay.weights[my] * az.weights[mz]);
                if with_derivative {
                    let gx = ax.dweights[mx] * ay.weights[my] * az.weights[mz];
                    let gy = ax.weights[mx] * ay.dweights[my] * az.weights[mz];
                    let gz = ax.weights[mx] * ay.weights[my] * az.dweights[mz];
                    for comp in 0..3 {
                        deriv[(comp, 0)] += gx * v[comp];
                        deriv[(comp, 1)] += gy * v[comp];
                        deriv[(comp, 2)] += gz * v[comp];
                    }
                }
            }
        }
    }
    (value, deriv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Matrix3 as M3;
    use approx::assert_relative_eq;

    #[test]
    fn test_basis_partition_of_unity() {
        for f in [0.0, 0.2, 0.5, 0.8, 0.999] {
            let w = weights(f);
            assert_relative_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
            let dw = derivative_weights(f);
            assert_relative_eq!(dw.iter().sum::<f64>(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_derivative_weights_match_numeric() {
        let f = 0.37;
        let h = 1e-7;
        let hi = weights(f + h);
        let lo = weights(f - h);
        let dw = derivative_weights(f);
        for m in 0..4 {
            assert_relative_eq!(dw[m], (hi[m] - lo[m]) / (2.0 * h), epsilon = 1e-6);
        }
    }

    fn constant_grid(value: Vector3) -> VectorGrid {
        let dims = [4, 4, 4];
        let mut grid = VectorGrid::zeros(
            dims,
            Vector3::zeros(),
            Vector3::new(1.0, 1.0, 1.0),
            M3::identity(),
        )
        .unwrap();
        for k in 0..4 {
            for j in 0..4 {
                for i in 0..4 {
                    grid.set_vector_at([i, j, k], value);
                }
            }
        }
        grid
    }

    #[test]
    fn test_constant_coefficients_give_constant_field() {
        let grid = constant_grid(Vector3::new(2.0, -1.0, 0.5));
        let v = sample(&grid, &Vector3::new(1.5, 1.25, 1.75), BorderMode::Edge);
        assert_relative_eq!(v.x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(v.y, -1.0, epsilon = 1e-12);
        assert_relative_eq!(v.z, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_border_fades_out() {
        let grid = constant_grid(Vector3::new(1.0, 1.0, 1.0));
        // far outside the support every coefficient is out of range
        let far = sample(&grid, &Vector3::new(20.0, 20.0, 20.0), BorderMode::Zero);
        assert_eq!(far, Vector3::zeros());
        // with edge extension the field continues at full strength
        let edge = sample(&grid, &Vector3::new(20.0, 20.0, 20.0), BorderMode::Edge);
        assert_relative_eq!(edge.x, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sample_derivative_matches_central_difference() {
        let mut grid = constant_grid(Vector3::zeros());
        grid.set_vector_at([1, 2, 1], Vector3::new(3.0, -2.0, 1.0));
        grid.set_vector_at([2, 1, 2], Vector3::new(-1.0, 4.0, 2.0));
        let idx = Vector3::new(1.4, 1.6, 1.5);
        let h = 1e-5;
        let (_, deriv) = sample_with_derivative(&grid, &idx, BorderMode::Edge);
        for axis in 0..3 {
            let mut lo = idx;
            let mut hi = idx;
            lo[axis] -= h;
            hi[axis] += h;
            let num =
                (sample(&grid, &hi, BorderMode::Edge) - sample(&grid, &lo, BorderMode::Edge))
                    / (2.0 * h);
            for comp in 0..3 {
                assert_relative_eq!(deriv[(comp, axis)], num[comp], epsilon = 1e-5);
            }
        }
    }
}
