//! Affine transforms stored as homogeneous 4x4 matrices.

use crate::error::{Result, TransformError};
use crate::geometry::{
    apply_affine, has_affine_bottom_row, linear_part, Matrix3, Matrix4, Point3,
};

/// An affine transform with a cached inverse.
///
/// The bottom row must be `[0, 0, 0, 1]` and the matrix must be
/// invertible; both are checked at construction so evaluation never
/// fails.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearTransform {
    matrix: Matrix4,
    inverse_matrix: Matrix4,
    inverse_flag: bool,
}

impl LinearTransform {
    pub fn new(matrix: Matrix4) -> Result<Self> {
        if !has_affine_bottom_row(&matrix) {
            return Err(TransformError::malformed(
                "affine matrix must have bottom row [0, 0, 0, 1]",
            ));
        }
        let inverse_matrix = matrix.try_inverse().ok_or_else(|| {
            TransformError::malformed("affine matrix is singular and cannot be inverted")
        })?;
        Ok(Self { matrix, inverse_matrix, inverse_flag: false })
    }

    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
            inverse_matrix: Matrix4::identity(),
            inverse_flag: false,
        }
    }

    /// The matrix as configured, ignoring the inverse flag.
    pub fn matrix(&self) -> &Matrix4 {
        &self.matrix
    }

    /// The matrix the transform currently applies, honoring the flag.
    pub fn effective_matrix(&self) -> &Matrix4 {
        if self.inverse_flag {
            &self.inverse_matrix
        } else {
            &self.matrix
        }
    }

    pub fn inverse_flag(&self) -> bool {
        self.inverse_flag
    }

    /// Flip the direction of the transform without touching the matrix.
    pub fn invert(&mut self) {
        self.inverse_flag = !self.inverse_flag;
    }

    pub fn inverted(&self) -> Self {
        let mut t = self.clone();
        t.invert();
        t
    }

    pub(crate) fn apply_point(&self, p: &Point3, invert: bool) -> Point3 {
        if invert != self.inverse_flag {
            apply_affine(&self.inverse_matrix, p)
        } else {
            apply_affine(&self.matrix, p)
        }
    }

    pub(crate) fn apply_derivative(&self, p: &Point3, invert: bool) -> (Point3, Matrix3) {
        let m = if invert != self.inverse_flag {
            &self.inverse_matrix
        } else {
            &self.matrix
        };
        (apply_affine(m, p), linear_part(m))
    }

    pub fn transform_point(&self, p: &Point3) -> Point3 {
        self.apply_point(p, false)
    }
}
