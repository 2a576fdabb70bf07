//! Dense displacement-grid transform with arbitrary grid orientation.

use tracing::warn;

use crate::error::Result;
use crate::geometry::{apply_affine, linear_part, Matrix3, Matrix4, Point3, Vector3};
use crate::grid::VectorGrid;
use crate::interpolation::{self, InterpolationMode};
use crate::transform::newton::{self, NewtonParams};

/// A transform defined by a grid of displacement vectors.
///
/// The forward mapping is `p + scale * D(p) + shift`, where `D` samples
/// the grid at the continuous voxel index of `p`. The grid may be
/// rotated or sheared relative to the world axes; points are taken into
/// index space through the grid's full index-to-world matrix, not just
/// origin and spacing.
///
/// The world-to-index matrix is cached. Replacing the grid marks the
/// cache dirty and [`Self::update`] must be called before the next
/// evaluation.
#[derive(Debug, Clone)]
pub struct OrientedGridTransform {
    grid: VectorGrid,
    interpolation: InterpolationMode,
    displacement_scale: f64,
    displacement_shift: f64,
    inverse_flag: bool,
    inverse_tolerance: f64,
    inverse_iterations: u32,
    world_to_index: Matrix4,
    dirty: bool,
}

impl OrientedGridTransform {
    /// Build a transform around a displacement grid.
    ///
    /// Fails when the grid's direction matrix is singular, since world
    /// coordinates could not be mapped into the grid.
    pub fn new(grid: VectorGrid) -> Result<Self> {
        let world_to_index = grid.world_to_index()?;
        Ok(Self {
            grid,
            interpolation: InterpolationMode::Linear,
            displacement_scale: 1.0,
            displacement_shift: 0.0,
            inverse_flag: false,
            inverse_tolerance: 1e-3,
            inverse_iterations: 500,
            world_to_index,
            dirty: false,
        })
    }

    pub fn grid(&self) -> &VectorGrid {
        &self.grid
    }

    /// Replace the displacement grid. The cached world-to-index matrix
    /// becomes stale; call [`Self::update`] before evaluating again.
    pub fn set_grid(&mut self, grid: VectorGrid) {
        self.grid = grid;
        self.dirty = true;
    }

    /// Recompute the cached world-to-index matrix after a grid change.
    pub fn update(&mut self) -> Result<()> {
        self.world_to_index = self.grid.world_to_index()?;
        self.dirty = false;
        Ok(())
    }

    pub fn interpolation(&self) -> InterpolationMode {
        self.interpolation
    }

    pub fn set_interpolation(&mut self, mode: InterpolationMode) {
        self.interpolation = mode;
    }

    pub fn displacement_scale(&self) -> f64 {
        self.displacement_scale
    }

    pub fn set_displacement_scale(&mut self, scale: f64) {
        self.displacement_scale = scale;
    }

    pub fn displacement_shift(&self) -> f64 {
        self.displacement_shift
    }

    pub fn set_displacement_shift(&mut self, shift: f64) {
        self.displacement_shift = shift;
    }

    pub fn inverse_tolerance(&self) -> f64 {
        self.inverse_tolerance
    }

    pub fn set_inverse_tolerance(&mut self, tolerance: f64) {
        self.inverse_tolerance = tolerance;
    }

    pub fn set_inverse_iterations(&mut self, iterations: u32) {
        self.inverse_iterations = iterations;
    }

    pub fn inverse_flag(&self) -> bool {
        self.inverse_flag
    }

    /// Flip between the forward and the (iteratively computed) inverse
    /// mapping. No grid data changes.
    pub fn invert(&mut self) {
        self.inverse_flag = !self.inverse_flag;
    }

    pub fn inverted(&self) -> Self {
        let mut t = self.clone();
        t.invert();
        t
    }

    fn assert_updated(&self) {
        assert!(
            !self.dirty,
            "grid transform evaluated with a stale world-to-index matrix; call update()"
        );
    }

    fn continuous_index(&self, p: &Point3) -> Vector3 {
        apply_affine(&self.world_to_index, p).coords
    }

    /// Sampled displacement at a world point, scale and shift applied.
    pub fn displacement(&self, p: &Point3) -> Vector3 {
        self.assert_updated();
        let d = interpolation::sample(&self.grid, &self.continuous_index(p), self.interpolation);
        d * self.displacement_scale + Vector3::repeat(self.displacement_shift)
    }

    pub fn forward_point(&self, p: &Point3) -> Point3 {
        p + self.displacement(p)
    }

    /// Forward point and the analytic forward Jacobian.
    pub fn forward_derivative(&self, p: &Point3) -> (Point3, Matrix3) {
        self.assert_updated();
        let (d, index_deriv) = interpolation::sample_with_derivative(
            &self.grid,
            &self.continuous_index(p),
            self.interpolation,
        );
        let out = p
            + d * self.displacement_scale
            + Vector3::repeat(self.displacement_shift);
        // chain rule through the world-to-index mapping
        let jac = Matrix3::identity()
            + index_deriv * linear_part(&self.world_to_index) * self.displacement_scale;
        (out, jac)
    }

    /// Invert the forward mapping at `p` by damped Newton iteration.
    ///
    /// When the iteration does not converge a warning is emitted and
    /// the best estimate found is returned.
    pub fn inverse_point(&self, p: &Point3) -> Point3 {
        self.inverse_derivative(p).0
    }

    pub fn inverse_derivative(&self, p: &Point3) -> (Point3, Matrix3) {
        self.assert_updated();
        // undoing the local displacement gives a good starting guess
        let initial = p - self.displacement(p);
        let params = NewtonParams {
            tolerance: self.inverse_tolerance,
            max_iterations: self.inverse_iterations,
        };
        let outcome = newton::invert(p, initial, params, |x| self.forward_derivative(x));
        if !outcome.converged {
            warn!(
                iterations = outcome.iterations,
                "grid transform inversion did not converge at ({}, {}, {})",
                p.x,
                p.y,
                p.z
            );
        }
        let inverse_jac = outcome
            .jacobian
            .try_inverse()
            .unwrap_or_else(Matrix3::identity);
        (outcome.point, inverse_jac)
    }

    pub(crate) fn apply_point(&self, p: &Point3, invert: bool) -> Point3 {
        if invert != self.inverse_flag {
            self.inverse_point(p)
        } else {
            self.forward_point(p)
        }
    }

    pub(crate) fn apply_derivative(&self, p: &Point3, invert: bool) -> (Point3, Matrix3) {
        if invert != self.inverse_flag {
            self.inverse_derivative(p)
        } else {
            self.forward_derivative(p)
        }
    }

    /// Apply the transform as configured (honors the inverse flag).
    pub fn transform_point(&self, p: &Point3) -> Point3 {
        self.apply_point(p, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridData;
    use approx::assert_relative_eq;

    fn constant_field(displacement: Vector3) -> OrientedGridTransform {
        let dims = [4, 4, 4];
        let mut data = Vec::with_capacity(dims[0] * dims[1] * dims[2] * 3);
        for _ in 0..dims[0] * dims[1] * dims[2] {
            data.extend_from_slice(&[displacement.x, displacement.y, displacement.z]);
        }
        let grid = VectorGrid::new(
            dims,
            Vector3::new(-10.0, -10.0, -10.0),
            Vector3::new(10.0, 10.0, 10.0),
            Matrix3::identity(),
            GridData::F64(data),
        )
        .unwrap();
        OrientedGridTransform::new(grid).unwrap()
    }

    #[test]
    fn test_constant_field_translates() {
        let t = constant_field(Vector3::new(2.0, -1.0, 0.5));
        let p = Point3::new(1.0, 2.0, 3.0);
        assert_eq!(t.forward_point(&p), Point3::new(3.0, 1.0, 3.5));
    }

    #[test]
    fn test_scale_and_shift_are_applied() {
        let mut t = constant_field(Vector3::new(2.0, -1.0, 0.5));
        t.set_displacement_scale(2.0);
        t.set_displacement_shift(1.0);
        let p = Point3::origin();
        assert_eq!(t.forward_point(&p), Point3::new(5.0, -1.0, 2.0));
    }

    #[test]
    fn test_zero_field_inverse_converges_immediately() {
        let t = constant_field(Vector3::zeros());
        let p = Point3::new(3.0, -2.0, 1.0);
        assert_eq!(t.inverse_point(&p), p);
    }

    #[test]
    fn test_inverse_round_trip() {
        let dims = [5, 5, 5];
        let mut grid = VectorGrid::zeros(
            dims,
            Vector3::new(-20.0, -20.0, -20.0),
            Vector3::new(10.0, 10.0, 10.0),
            Matrix3::identity(),
        )
        .unwrap();
        // smooth bump in the middle, small relative to spacing
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    let cx = i as f64 - 2.0;
                    let cy = j as f64 - 2.0;
                    let cz = k as f64 - 2.0;
                    let w = (-0.3 * (cx * cx + cy * cy + cz * cz)).exp();
                    grid.set_vector_at([i, j, k], Vector3::new(2.0 * w, -1.5 * w, w));
                }
            }
        }
        let t = OrientedGridTransform::new(grid).unwrap();
        let p = Point3::new(3.0, -4.0, 5.0);
        let q = t.forward_point(&p);
        let back = t.inverse_point(&q);
        assert_relative_eq!(back.x, p.x, epsilon = 1e-2);
        assert_relative_eq!(back.y, p.y, epsilon = 1e-2);
        assert_relative_eq!(back.z, p.z, epsilon = 1e-2);
    }

    #[test]
    fn test_oriented_grid_respects_direction() {
        // 90 degree rotation about z: index x axis points along world y
        let direction =
            Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let dims = [3, 3, 3];
        let mut grid = VectorGrid::zeros(
            dims,
            Vector3::zeros(),
            Vector3::new(1.0, 1.0, 1.0),
            direction,
        )
        .unwrap();
        // displacement grows along index axis 0
        for k in 0..3 {
            for j in 0..3 {
                for i in 0..3 {
                    grid.set_vector_at([i, j, k], Vector3::new(i as f64, 0.0, 0.0));
                }
            }
        }
        let t = OrientedGridTransform::new(grid).unwrap();
        // world point (0, 1, 0) sits at index (1, 0, 0)
        let q = t.forward_point(&Point3::new(0.0, 1.0, 0.0));
        assert_relative_eq!(q.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(q.y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(q.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_forward_derivative_matches_central_difference() {
        let dims = [5, 5, 5];
        let mut grid = VectorGrid::zeros(
            dims,
            Vector3::new(-20.0, -20.0, -20.0),
            Vector3::new(10.0, 10.0, 10.0),
            Matrix3::identity(),
        )
        .unwrap();
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    grid.set_vector_at(
                        [i, j, k],
                        Vector3::new(
                            (i * j) as f64 * 0.1,
                            (j + k) as f64 * 0.2,
                            (i as f64 - k as f64) * 0.3,
                        ),
                    );
                }
            }
        }
        let t = OrientedGridTransform::new(grid).unwrap();
        let p = Point3::new(3.0, -2.0, 4.0);
        let (_, jac) = t.forward_derivative(&p);
        let h = 1e-4;
        for axis in 0..3 {
            let mut lo = p;
            let mut hi = p;
            lo[axis] -= h;
            hi[axis] += h;
            let num = (t.forward_point(&hi) - t.forward_point(&lo)) / (2.0 * h);
            for comp in 0..3 {
                assert_relative_eq!(jac[(comp, axis)], num[comp], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_inverse_flag_swaps_directions() {
        let t = constant_field(Vector3::new(1.0, 0.0, 0.0));
        let p = Point3::origin();
        let forward = t.transform_point(&p);
        assert_eq!(forward, Point3::new(1.0, 0.0, 0.0));
        let back = t.inverted().transform_point(&forward);
        assert_relative_eq!(back.x, 0.0, epsilon = 1e-6);
    }

    #[test]
    #[should_panic(expected = "stale world-to-index")]
    fn test_stale_cache_is_detected() {
        let mut t = constant_field(Vector3::zeros());
        let grid = t.grid().clone();
        t.set_grid(grid);
        let _ = t.forward_point(&Point3::origin());
    }
}
