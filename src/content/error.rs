//! Errors raised while resolving ignition content.

use thiserror::Error;

/// Errors raised while classifying or materialising ignition content.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ContentError {
    /// Raised when the content is neither an existing path nor a JSON object.
    #[error("ignition content is neither an existing file nor a valid JSON object: {preview}")]
    InvalidContent {
        /// Leading part of the rejected content.
        preview: String,
    },
    /// Raised when a local file operation fails.
    #[error("failed to {action} `{path}`: {message}")]
    Io {
        /// Operation that failed (for example `copy ignition file`).
        action: String,
        /// Path involved in the failing operation.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

impl ContentError {
    pub(crate) fn io(
        action: &str,
        path: impl std::fmt::Display,
        err: &impl std::fmt::Display,
    ) -> Self {
        Self::Io {
            action: action.to_owned(),
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}
