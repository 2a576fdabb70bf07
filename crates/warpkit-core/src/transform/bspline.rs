//! Free-form deformation by a cubic B-spline over a coefficient grid.

use tracing::warn;

use crate::error::{Result, TransformError};
use crate::geometry::{
    apply_affine, has_affine_bottom_row, linear_part, Matrix3, Matrix4, Point3, Vector3,
};
use crate::grid::VectorGrid;
use crate::interpolation::bspline::{self, BorderMode};
use crate::transform::newton::{self, NewtonParams};

/// A cubic B-spline deformation with an optional additive bulk matrix.
///
/// The forward mapping is `B(p) + scale * S(p)`, where `S` evaluates
/// the spline at the continuous coefficient-grid index of `p` and `B`
/// is the bulk affine (identity when absent). The additive combination
/// matches the legacy ITKv3 convention, where the bulk component is a
/// separate transform added to the spline displacement rather than
/// composed with it.
///
/// Like the grid transform, the world-to-index matrix is cached;
/// [`Self::update`] recomputes it after the coefficients are replaced.
#[derive(Debug, Clone)]
pub struct OrientedBSplineTransform {
    coefficients: VectorGrid,
    border_mode: BorderMode,
    displacement_scale: f64,
    bulk: Option<Matrix4>,
    bulk_inverse: Matrix4,
    inverse_flag: bool,
    inverse_tolerance: f64,
    inverse_iterations: u32,
    world_to_index: Matrix4,
    dirty: bool,
}

impl OrientedBSplineTransform {
    pub fn new(coefficients: VectorGrid) -> Result<Self> {
        let world_to_index = coefficients.world_to_index()?;
        Ok(Self {
            coefficients,
            border_mode: BorderMode::Edge,
            displacement_scale: 1.0,
            bulk: None,
            bulk_inverse: Matrix4::identity(),
            inverse_flag: false,
            inverse_tolerance: 1e-3,
            inverse_iterations: 500,
            world_to_index,
            dirty: false,
        })
    }

    pub fn coefficients(&self) -> &VectorGrid {
        &self.coefficients
    }

    /// Replace the coefficient grid; call [`Self::update`] before the
    /// next evaluation.
    pub fn set_coefficients(&mut self, coefficients: VectorGrid) {
        self.coefficients = coefficients;
        self.dirty = true;
    }

    pub fn update(&mut self) -> Result<()> {
        self.world_to_index = self.coefficients.world_to_index()?;
        self.dirty = false;
        Ok(())
    }

    pub fn border_mode(&self) -> BorderMode {
        self.border_mode
    }

    pub fn set_border_mode(&mut self, mode: BorderMode) {
        self.border_mode = mode;
    }

    pub fn displacement_scale(&self) -> f64 {
        self.displacement_scale
    }

    pub fn set_displacement_scale(&mut self, scale: f64) {
        self.displacement_scale = scale;
    }

    pub fn bulk(&self) -> Option<&Matrix4> {
        self.bulk.as_ref()
    }

    /// Set the additive bulk matrix. Must be an invertible affine so
    /// the transform stays invertible.
    pub fn set_bulk(&mut self, bulk: Matrix4) -> Result<()> {
        if !has_affine_bottom_row(&bulk) {
            return Err(TransformError::malformed(
                "bulk matrix must have bottom row [0, 0, 0, 1]",
            ));
        }
        self.bulk_inverse = bulk.try_inverse().ok_or_else(|| {
            TransformError::malformed("bulk matrix is singular and cannot be inverted")
        })?;
        self.bulk = Some(bulk);
        Ok(())
    }

    pub fn clear_bulk(&mut self) {
        self.bulk = None;
        self.bulk_inverse = Matrix4::identity();
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
            "spline transform evaluated with a stale world-to-index matrix; call update()"
        );
    }

    fn continuous_index(&self, p: &Point3) -> Vector3 {
        apply_affine(&self.world_to_index, p).coords
    }

    /// Spline displacement at a world point, scale applied, bulk excluded.
    pub fn spline_displacement(&self, p: &Point3) -> Vector3 {
        self.assert_updated();
        bspline::sample(&self.coefficients, &self.continuous_index(p), self.border_mode)
            * self.displacement_scale
    }

    pub fn forward_point(&self, p: &Point3) -> Point3 {
        let base = match &self.bulk {
            Some(bulk) => apply_affine(bulk, p),
            None => *p,
        };
        base + self.spline_displacement(p)
    }

    pub fn forward_derivative(&self, p: &Point3) -> (Point3, Matrix3) {
        self.assert_updated();
        let (base, base_jac) = match &self.bulk {
            Some(bulk) => (apply_affine(bulk, p), linear_part(bulk)),
            None => (*p, Matrix3::identity()),
        };
        let (d, index_deriv) = bspline::sample_with_derivative(
            &self.coefficients,
            &self.continuous_index(p),
            self.border_mode,
        );
        let out = base + d * self.displacement_scale;
        let jac = base_jac
            + index_deriv * linear_part(&self.world_to_index) * self.displacement_scale;
        (out, jac)
    }

    /// Invert the forward mapping by damped Newton iteration; emits a
    /// warning and returns the best estimate on non-convergence.
    pub fn inverse_point(&self, p: &Point3) -> Point3 {
        self.inverse_derivative(p).0
    }

    pub fn inverse_derivative(&self, p: &Point3) -> (Point3, Matrix3) {
        self.assert_updated();
        // start from the bulk inverse, then peel off the local spline term
        let base = apply_affine(&self.bulk_inverse, p);
        let initial = base - self.spline_displacement(&base);
        let params = NewtonParams {
            tolerance: self.inverse_tolerance,
            max_iterations: self.inverse_iterations,
        };
        let outcome = newton::invert(p, initial, params, |x| self.forward_derivative(x));
        if !outcome.converged {
            warn!(
                iterations = outcome.iterations,
                "spline transform inversion did not converge at ({}, {}, {})",
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

    pub fn transform_point(&self, p: &Point3) -> Point3 {
        self.apply_point(p, false)
    }
}
