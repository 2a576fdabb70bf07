//! Conversions between the LPS and RAS anatomical coordinate frames.
//!
//! ITK-style transform files store everything in LPS (left-posterior-
//! superior); the in-memory transforms here work in RAS (right-anterior-
//! superior). The two frames differ by a sign flip of the first two
//! axes, so every conversion in this module is its own inverse.

use crate::geometry::{Matrix3, Matrix4, Point3, Vector3};
use crate::grid::VectorGrid;

/// Homogeneous flip matrix `diag(-1, -1, 1, 1)` between LPS and RAS.
pub fn flip_matrix() -> Matrix4 {
    Matrix4::from_diagonal(&nalgebra::Vector4::new(-1.0, -1.0, 1.0, 1.0))
}

/// Convert an affine transform matrix between frames: `F * M * F`.
///
/// Conjugating by the flip converts both the input and output side of
/// the transform, which is what a transform acting on points needs.
pub fn matrix_lps_to_ras(m: &Matrix4) -> Matrix4 {
    let f = flip_matrix();
    f * m * f
}

/// Same conjugation in the opposite direction (the flip is involutive).
pub fn matrix_ras_to_lps(m: &Matrix4) -> Matrix4 {
    matrix_lps_to_ras(m)
}

/// Convert a direction-cosine matrix between frames.
///
/// Direction matrices map voxel axes to world axes, so only the world
/// side flips: `F3 * D`.
pub fn directions_lps_to_ras(d: &Matrix3) -> Matrix3 {
    flip3() * d
}

pub fn directions_ras_to_lps(d: &Matrix3) -> Matrix3 {
    directions_lps_to_ras(d)
}

/// Convert a displacement or position vector between frames.
pub fn vector_lps_to_ras(v: &Vector3) -> Vector3 {
    Vector3::new(-v.x, -v.y, v.z)
}

pub fn vector_ras_to_lps(v: &Vector3) -> Vector3 {
    vector_lps_to_ras(v)
}

/// Convert a point between frames.
pub fn point_lps_to_ras(p: &Point3) -> Point3 {
    Point3::new(-p.x, -p.y, p.z)
}

pub fn point_ras_to_lps(p: &Point3) -> Point3 {
    point_lps_to_ras(p)
}

/// Convert a whole vector grid between frames: origin and direction
/// cosines move to the other frame, and every stored displacement
/// vector has its first two components negated. Spacing is a set of
/// per-axis distances and does not change.
pub fn grid_lps_to_ras(grid: &VectorGrid) -> VectorGrid {
    let data = grid.data().map_scalars(|i, s| if i % 3 == 2 { s } else { -s });
    let flipped = VectorGrid::new(
        grid.dims(),
        vector_lps_to_ras(&grid.origin()),
        grid.spacing(),
        directions_lps_to_ras(&grid.direction()),
        data,
    );
    // the source grid was already validated, only signs changed
    match flipped {
        Ok(g) => g,
        Err(_) => unreachable!("sign flip cannot invalidate a grid"),
    }
}

pub fn grid_ras_to_lps(grid: &VectorGrid) -> VectorGrid {
    grid_lps_to_ras(grid)
}

fn flip3() -> Matrix3 {
    Matrix3::from_diagonal(&Vector3::new(-1.0, -1.0, 1.0))
}
