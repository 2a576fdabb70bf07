//! Evaluation of spatial transforms for medical image warping.
//!
//! This crate provides the in-memory transform model: affine matrices,
//! oriented displacement grids, cubic B-spline free-form deformations,
//! and ordered chains of all of these. Transforms work in the RAS
//! (right-anterior-superior) world frame; the [`coordinate`] module
//! converts to and from the LPS frame used by ITK-style files, and the
//! companion I/O crate handles the files themselves.
//!
//! Nonlinear transforms expose analytic Jacobians and an iterative
//! inverse, so a transform can be evaluated in either direction no
//! matter which direction was stored.

pub mod coordinate;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod interpolation;
pub mod message;
pub mod transform;

pub use error::{Result, TransformError};
pub use geometry::{Matrix3, Matrix4, Point3, Vector3};
pub use grid::{GridData, GridScalar, ScalarPrecision, VectorGrid};
pub use interpolation::bspline::BorderMode;
pub use interpolation::InterpolationMode;
pub use message::{Message, MessageLog, Severity};
pub use transform::{
    LinearTransform, OrientedBSplineTransform, OrientedGridTransform, Transform, TransformChain,
};
