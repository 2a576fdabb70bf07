//! Reading and writing spatial transforms in ITK-compatible formats.
//!
//! Supported formats:
//! - ITK text transform files (`.tfm`, `.txt`), including composite
//!   containers and the legacy ITKv3 B-spline-with-bulk layout
//! - NIfTI displacement-field images (`.nii`, `.nii.gz`)
//!
//! Files store transforms in the LPS frame; everything returned by this
//! crate has been converted to the RAS in-memory model of
//! `warpkit-core`. Start at [`storage::read_transform`] and
//! [`storage::write_transform`] unless you need record-level access.

pub mod bridge;
pub mod field_image;
pub mod record;
pub mod storage;

pub use bridge::{records_from_transform, transform_from_records, WriteOptions};
pub use record::{read_transform_file, write_transform_file, TransformRecord};
pub use storage::{is_image_file, read_transform, write_transform};
