//! Geometric type aliases and homogeneous-matrix helpers.

use nalgebra::{Matrix3 as NaMatrix3, Matrix4 as NaMatrix4, Point3 as NaPoint3, Vector3 as NaVector3};

pub type Point3 = NaPoint3<f64>;
pub type Vector3 = NaVector3<f64>;
pub type Matrix3 = NaMatrix3<f64>;
pub type Matrix4 = NaMatrix4<f64>;

/// Embed a 3x3 linear part into a homogeneous 4x4 matrix with zero translation.
pub fn embed_linear(linear: &Matrix3) -> Matrix4 {
    let mut m = Matrix4::identity();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(linear);
    m
}

/// Build a homogeneous 4x4 matrix from a linear part and a translation.
pub fn compose_affine(linear: &Matrix3, translation: &Vector3) -> Matrix4 {
    let mut m = embed_linear(linear);
    m[(0, 3)] = translation.x;
    m[(1, 3)] = translation.y;
    m[(2, 3)] = translation.z;
    m
}

/// The 3x3 linear part of a homogeneous 4x4 matrix.
pub fn linear_part(m: &Matrix4) -> Matrix3 {
    m.fixed_view::<3, 3>(0, 0).into_owned()
}

/// The translation column of a homogeneous 4x4 matrix.
pub fn translation_part(m: &Matrix4) -> Vector3 {
    Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)])
}

/// Apply a homogeneous 4x4 matrix to a point (assumes the bottom row is [0,0,0,1]).
pub fn apply_affine(m: &Matrix4, p: &Point3) -> Point3 {
    Point3::from(linear_part(m) * p.coords + translation_part(m))
}

/// Check whether the bottom row of a 4x4 matrix is exactly [0,0,0,1].
pub fn has_affine_bottom_row(m: &Matrix4) -> bool {
    m[(3, 0)] == 0.0 && m[(3, 1)] == 0.0 && m[(3, 2)] == 0.0 && m[(3, 3)] == 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_and_split() {
        let linear = Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0);
        let translation = Vector3::new(10.0, 20.0, 30.0);
        let m = compose_affine(&linear, &translation);

        assert_eq!(linear_part(&m), linear);
        assert_eq!(translation_part(&m), translation);
        assert!(has_affine_bottom_row(&m));
    }

    #[test]
    fn test_apply_affine_translation() {
        let m = compose_affine(&Matrix3::identity(), &Vector3::new(1.0, 2.0, 3.0));
        let p = apply_affine(&m, &Point3::new(1.0, 1.0, 1.0));
        assert_eq!(p, Point3::new(2.0, 3.0, 4.0));
    }

    #[test]
    fn test_embed_linear_keeps_bottom_row() {
        let m = embed_linear(&Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0));
        assert!(has_affine_bottom_row(&m));
        assert_eq!(translation_part(&m), Vector3::zeros());
    }
}
