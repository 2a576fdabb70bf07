//! Error types for transform construction and evaluation.

use thiserror::Error;

/// Errors raised while building or converting transforms.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    /// The input data is structurally invalid (wrong parameter counts,
    /// inconsistent sizes, unparseable content).
    #[error("Malformed transform data: {0}")]
    MalformedData(String),

    /// The data is valid but describes a configuration this library
    /// deliberately does not handle.
    #[error("Unsupported transform configuration: {0}")]
    UnsupportedConfiguration(String),

    /// The grid direction matrix cannot be inverted, so world
    /// coordinates cannot be mapped into the grid.
    #[error("Singular grid directions: {0}")]
    SingularGridDirections(String),
}

impl TransformError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedData(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedConfiguration(msg.into())
    }

    pub fn singular(msg: impl Into<String>) -> Self {
        Self::SingularGridDirections(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TransformError>;
