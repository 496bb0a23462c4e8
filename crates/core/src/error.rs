//! Core error model.

use thiserror::Error;

/// Result type used by the identifier layer.
pub type CoreResult<T> = Result<T, CoreError>;

/// Failures raised while building or parsing core identifiers.
///
/// Keep this limited to deterministic value errors. Storage, borrowing and
/// pipeline failures have their own error types in the crates that own them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A qualified name did not have the `package.entity` shape.
    #[error("invalid qualified name: {0}")]
    InvalidQName(String),

    /// An application name did not have the `owner/name` shape.
    #[error("invalid application name: {0}")]
    InvalidAppName(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    pub fn invalid_qname(msg: impl Into<String>) -> Self {
        Self::InvalidQName(msg.into())
    }

    pub fn invalid_app_name(msg: impl Into<String>) -> Self {
        Self::InvalidAppName(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
