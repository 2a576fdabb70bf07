//! Ordered composition of transforms.

use crate::geometry::{Matrix3, Point3};
use crate::transform::Transform;

/// A sequence of transforms applied first-to-last.
///
/// `chain.transform_point(p)` computes `T_n(... T_2(T_1(p)))` where
/// `T_1` is the first element. Inverting the chain reverses the order
/// and inverts every member, which the flag-based evaluation performs
/// lazily.
#[derive(Debug, Clone, Default)]
pub struct TransformChain {
    transforms: Vec<Transform>,
    inverse_flag: bool,
}

impl TransformChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_transforms(transforms: Vec<Transform>) -> Self {
        Self { transforms, inverse_flag: false }
    }

    pub fn push(&mut self, transform: Transform) {
        self.transforms.push(transform);
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn inverse_flag(&self) -> bool {
        self.inverse_flag
    }

    pub fn invert(&mut self) {
        self.inverse_flag = !self.inverse_flag;
    }

    pub fn inverted(&self) -> Self {
        let mut c = self.clone();
        c.invert();
        c
    }

    pub(crate) fn apply_point(&self, p: &Point3, invert: bool) -> Point3 {
        let inverted = invert != self.inverse_flag;
        let mut q = *p;
        if inverted {
            for t in self.transforms.iter().rev() {
                q = t.apply_point(&q, true);
            }
        } else {
            for t in &self.transforms {
                q = t.apply_point(&q, false);
            }
        }
        q
    }

    pub(crate) fn apply_derivative(&self, p: &Point3, invert: bool) -> (Point3, Matrix3) {
        let inverted = invert != self.inverse_flag;
        let mut q = *p;
        let mut jac = Matrix3::identity();
        if inverted {
            for t in self.transforms.iter().rev() {
                let (next, j) = t.apply_derivative(&q, true);
                q = next;
                jac = j * jac;
            }
        } else {
            for t in &self.transforms {
                let (next, j) = t.apply_derivative(&q, false);
                q = next;
                jac = j * jac;
            }
        }
        (q, jac)
    }

    pub fn transform_point(&self, p: &Point3) -> Point3 {
        self.apply_point(p, false)
    }
}
