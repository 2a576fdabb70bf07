//! Tricubic convolution interpolation (Catmull-Rom kernel, a = -1/2).
//!
//! Smoother than trilinear and interpolating (it passes through the
//! samples), which makes it the default choice when a displacement grid
//! is evaluated between voxels after resampling.

use crate::geometry::{Matrix3, Vector3};
use crate::grid::GridScalar;

fn kernel(x: f64) -> f64 {
    let a = x.abs();
    if a < 1.0 {
        (1.5 * a - 2.5) * a * a + 1.0
    } else if a < 2.0 {
        ((-0.5 * a + 2.5) * a - 4.0) * a + 2.0
    } else {
        0.0
    }
}

fn kernel_derivative(x: f64) -> f64 {
    let s = if x < 0.0 { -1.0 } else { 1.0 };
    let a = x.abs();
    let d = if a < 1.0 {
        (4.5 * a - 5.0) * a
    } else if a < 2.0 {
        (-1.5 * a + 5.0) * a - 4.0
    } else {
        0.0
    };
    s * d
}

struct Axis {
    // node indices, already clamped to the grid
    nodes: [usize; 4],
    weights: [f64; 4],
    dweights: [f64; 4],
}

fn axis(u: f64, n: usize) -> Axis {
    let uc = u.clamp(0.0, (n - 1) as f64);
    let base = uc.floor() as isize;
    let frac = uc - base as f64;
    let mut nodes = [0usize; 4];
    let mut weights = [0.0; 4];
    let mut dweights = [0.0; 4];
    for m in 0..4 {
        let idx = base - 1 + m as isize;
        nodes[m] = idx.clamp(0, n as isize - 1) as usize;
        let offset = frac + 1.0 - m as f64;
        weights[m] = kernel(offset);
        dweights[m] = kernel_derivative(offset);
    }
    Axis { nodes, weights, dweights }
}

pub(super) fn sample<T: GridScalar>(dims: [usize; 3], data: &[T], index: &Vector3) -> Vector3 {
    let (v, _) = accumulate(dims, data, index, false);
    v
}

pub(super) fn sample_with_derivative<T: GridScalar>(
    dims: [usize; 3],
    data: &[T],
    index: &Vector3,
) -> (Vector3, Matrix3) {
    accumulate(dims, data, index, true)
}

fn accumulate<T: GridScalar>(
    dims: [usize; 3],
    data: &[T],
    index: &Vector3,
    with_derivative: bool,
) -> (Vector3, Matrix3) {
    let ax = axis(index.x, dims[0]);
    let ay = axis(index.y, dims[1]);
    let az = axis(index.z, dims[2]);

    let mut value = Vector3::zeros();
    let mut deriv = Matrix3::zeros();
    for mz in 0..4 {
        for my in 0..4 {
            for mx in 0..4 {
                let v = super::vector_at(dims, data, ax.nodes[mx], ay.nodes[my], az.nodes[mz]);
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
    use approx::assert_relative_eq;

    #[test]
    fn test_kernel_is_interpolating() {
        assert_eq!(kernel(0.0), 1.0);
        assert_eq!(kernel(1.0), 0.0);
        assert_eq!(kernel(2.0), 0.0);
        assert_eq!(kernel(-1.0), 0.0);
    }

    #[test]
    fn test_weights_sum_to_one() {
        for f in [0.0, 0.1, 0.35, 0.5, 0.99] {
            let sum: f64 = (0..4).map(|m| kernel(f + 1.0 - m as f64)).sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
            let dsum: f64 = (0..4).map(|m| kernel_derivative(f + 1.0 - m as f64)).sum();
            assert_relative_eq!(dsum, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_kernel_derivative_is_continuous_at_knots() {
        let h = 1e-7;
        for x in [-2.0, -1.0, 0.0, 1.0, 2.0] {
            let num = (kernel(x + h) - kernel(x - h)) / (2.0 * h);
            assert_relative_eq!(kernel_derivative(x), num, epsilon = 1e-5);
        }
    }
}
