//! Spatial transforms: affine, displacement grid, B-spline, and chains.
//!
//! The [`Transform`] enum is the unit the I/O layer works with: one
//! tagged value per transform kind instead of a class hierarchy, so
//! matching on the kind is exhaustive and cheap.

mod bspline;
mod chained;
mod grid;
mod linear;
mod newton;

pub use bspline::OrientedBSplineTransform;
pub use chained::TransformChain;
pub use grid::OrientedGridTransform;
pub use linear::LinearTransform;

use crate::geometry::{Matrix3, Point3};

/// Any transform this library can evaluate or persist.
#[derive(Debug, Clone)]
pub enum Transform {
    Linear(LinearTransform),
    Grid(OrientedGridTransform),
    BSpline(OrientedBSplineTransform),
    Composite(TransformChain),
}

impl Transform {
    /// Apply the transform as configured (each node honors its own
    /// inverse flag).
    pub fn transform_point(&self, p: &Point3) -> Point3 {
        self.apply_point(p, false)
    }

    /// Point and Jacobian of the mapping as configured.
    pub fn transform_derivative(&self, p: &Point3) -> (Point3, Matrix3) {
        self.apply_derivative(p, false)
    }

    pub(crate) fn apply_point(&self, p: &Point3, invert: bool) -> Point3 {
        match self {
            Transform::Linear(t) => t.apply_point(p, invert),
            Transform::Grid(t) => t.apply_point(p, invert),
            Transform::BSpline(t) => t.apply_point(p, invert),
            Transform::Composite(t) => t.apply_point(p, invert),
        }
    }

    pub(crate) fn apply_derivative(&self, p: &Point3, invert: bool) -> (Point3, Matrix3) {
        match self {
            Transform::Linear(t) => t.apply_derivative(p, invert),
            Transform::Grid(t) => t.apply_derivative(p, invert),
            Transform::BSpline(t) => t.apply_derivative(p, invert),
            Transform::Composite(t) => t.apply_derivative(p, invert),
        }
    }

    /// True for the warping kinds whose inverse is computed iteratively.
    pub fn is_warp(&self) -> bool {
        matches!(self, Transform::Grid(_) | Transform::BSpline(_))
    }

    pub fn inverse_flag(&self) -> bool {
        match self {
            Transform::Linear(t) => t.inverse_flag(),
            Transform::Grid(t) => t.inverse_flag(),
            Transform::BSpline(t) => t.inverse_flag(),
            Transform::Composite(t) => t.inverse_flag(),
        }
    }

    /// Flip the direction of the whole transform in place.
    pub fn invert(&mut self) {
        match self {
            Transform::Linear(t) => t.invert(),
            Transform::Grid(t) => t.invert(),
            Transform::BSpline(t) => t.invert(),
            Transform::Composite(t) => t.invert(),
        }
    }

    pub fn inverted(&self) -> Self {
        let mut t = self.clone();
        t.invert();
        t
    }

    /// Leaf transforms in application order, with any chain-level
    /// inversion pushed down into the leaves.
    pub fn flattened(&self) -> Vec<Transform> {
        let mut leaves = Vec::new();
        self.collect_leaves(false, &mut leaves);
        leaves
    }

    fn collect_leaves(&self, invert: bool, out: &mut Vec<Transform>) {
        match self {
            Transform::Composite(chain) => {
                let inverted = invert != chain.inverse_flag();
                if inverted {
                    for t in chain.transforms().iter().rev() {
                        t.collect_leaves(true, out);
                    }
                } else {
                    for t in chain.transforms() {
                        t.collect_leaves(false, out);
                    }
                }
            }
            leaf => {
                let mut leaf = leaf.clone();
                if invert {
                    leaf.invert();
                }
                out.push(leaf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{compose_affine, Matrix3 as M3, Vector3};
    use approx::assert_relative_eq;

    fn translation(x: f64) -> Transform {
        let m = compose_affine(&M3::identity(), &Vector3::new(x, 0.0, 0.0));
        Transform::Linear(LinearTransform::new(m).unwrap())
    }

    #[test]
    fn test_flatten_unwraps_nested_chains() {
        let inner = TransformChain::from_transforms(vec![translation(1.0), translation(2.0)]);
        let outer = TransformChain::from_transforms(vec![
            Transform::Composite(inner),
            translation(4.0),
        ]);
        let t = Transform::Composite(outer);
        let leaves = t.flattened();
        assert_eq!(leaves.len(), 3);
        let q = leaves
            .iter()
            .fold(Point3::origin(), |p, t| t.transform_point(&p));
        assert_relative_eq!(q.x, 7.0);
    }

    #[test]
    fn test_flatten_pushes_inversion_into_leaves() {
        let chain = TransformChain::from_transforms(vec![translation(1.0), translation(2.0)]);
        let mut t = Transform::Composite(chain);
        t.invert();
        let leaves = t.flattened();
        assert_eq!(leaves.len(), 2);
        // reversed order, each leaf inverted
        let q = leaves
            .iter()
            .fold(Point3::origin(), |p, t| t.transform_point(&p));
        assert_relative_eq!(q.x, -3.0);
        assert!(leaves.iter().all(|l| l.inverse_flag()));
    }

    #[test]
    fn test_inverted_round_trips() {
        let t = translation(5.0);
        let p = Point3::new(1.0, 2.0, 3.0);
        let q = t.transform_point(&p);
        let back = t.inverted().transform_point(&q);
        assert_relative_eq!(back.x, p.x);
    }
}
