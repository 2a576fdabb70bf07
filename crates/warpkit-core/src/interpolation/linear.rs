//! Trilinear interpolation with analytic derivatives.

use crate::geometry::{Matrix3, Vector3};
use crate::grid::GridScalar;

struct Axis {
    i0: usize,
    i1: usize,
    frac: f64,
}

/// Clamp to the grid support and split into a cell index and a fraction.
fn axis(u: f64, n: usize) -> Axis {
    if n == 1 {
        return Axis { i0: 0, i1: 0, frac: 0.0 };
    }
    let uc = u.clamp(0.0, (n - 1) as f64);
    let mut i0 = uc.floor() as usize;
    if i0 > n - 2 {
        i0 = n - 2;
    }
    Axis { i0, i1: i0 + 1, frac: uc - i0 as f64 }
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

    let wx = [1.0 - ax.frac, ax.frac];
    let wy = [1.0 - ay.frac, ay.frac];
    let wz = [1.0 - az.frac, az.frac];
    let dw = [-1.0, 1.0];

    let mut value = Vector3::zeros();
    let mut deriv = Matrix3::zeros();
    for (kz, &k) in [az.i0, az.i1].iter().enumerate() {
        for (jy, &j) in [ay.i0, ay.i1].iter().enumerate() {
            for (ix, &i) in [ax.i0, ax.i1].iter().enumerate() {
                let v = super::vector_at(dims, data, i, j, k);
                value += v * (wx[ix] * wy[jy] * wz[kz]);
                if with_derivative {
                    let gx = dw[ix] * wy[jy] * wz[kz];
                    let gy = wx[ix] * dw[jy] * wz[kz];
                    let gz = wx[ix] * wy[jy] * dw[kz];
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
