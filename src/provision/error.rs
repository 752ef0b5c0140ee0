//! Error types for the provisioning workflow.

use std::fmt;

use thiserror::Error;

use crate::content::ContentError;
use crate::identifier::IdentifierError;
use crate::pool_lock::PoolLockError;
use crate::retry::RetryError;
use crate::upload::UploadError;

/// Backend interaction that failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    /// Looking up a storage pool by name.
    LookupPool,
    /// Refreshing pool metadata.
    RefreshPool,
    /// Creating the volume from its descriptor.
    CreateVolume,
    /// Streaming the payload into the volume.
    UploadVolume,
    /// Reading the key assigned to a new volume.
    ReadVolumeKey,
    /// Looking up a volume by key.
    LookupVolume,
    /// Finding the pool that owns a volume.
    LookupPoolByVolume,
}

impl fmt::Display for Step {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::LookupPool => "lookup pool",
            Self::RefreshPool => "refresh pool",
            Self::CreateVolume => "create volume",
            Self::UploadVolume => "upload volume",
            Self::ReadVolumeKey => "read volume key",
            Self::LookupVolume => "lookup volume",
            Self::LookupPoolByVolume => "lookup pool by volume",
        };
        formatter.write_str(text)
    }
}

/// Classification of a [`ProvisionError`] without its context.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// A pool or volume does not exist.
    NotFound,
    /// Content is neither a readable path nor a JSON object.
    InvalidContent,
    /// A local temporary file operation failed.
    Io,
    /// The virtualisation host rejected an operation.
    Backend,
    /// An external identifier could not be decoded.
    IdentifierFormat,
}

/// Errors raised while creating or resolving ignition volumes.
#[derive(Debug, Error)]
pub enum ProvisionError<BackendError>
where
    BackendError: std::error::Error + 'static,
{
    /// Raised when a pool or volume is absent.
    #[error("{resource} `{name}` not found")]
    NotFound {
        /// Kind of resource (`pool` or `volume`).
        resource: &'static str,
        /// Name or key used for the lookup.
        name: String,
    },
    /// Raised when the content is neither an existing path nor a JSON object.
    #[error("ignition content is neither an existing file nor a valid JSON object: {preview}")]
    InvalidContent {
        /// Leading part of the rejected content.
        preview: String,
    },
    /// Raised when a local file operation fails.
    #[error("failed to {action} `{path}`: {message}")]
    Io {
        /// Operation that failed.
        action: String,
        /// Path involved in the failure.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when a backend operation fails or returns unusable data.
    #[error("failed to {step} `{resource}`: {message}")]
    Backend {
        /// Step that failed.
        step: Step,
        /// Name, key, or path the step was working on.
        resource: String,
        /// Human-readable description of the failure.
        message: String,
        /// Provider-specific error, when the backend raised one.
        #[source]
        source: Option<BackendError>,
    },
    /// Raised when an external identifier is malformed.
    #[error(transparent)]
    IdentifierFormat(#[from] IdentifierError),
}

impl<BackendError> ProvisionError<BackendError>
where
    BackendError: std::error::Error + 'static,
{
    /// Returns the error classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidContent { .. } => ErrorKind::InvalidContent,
            Self::Io { .. } => ErrorKind::Io,
            Self::Backend { .. } => ErrorKind::Backend,
            Self::IdentifierFormat(_) => ErrorKind::IdentifierFormat,
        }
    }

    pub(super) fn backend(step: Step, resource: impl Into<String>, source: BackendError) -> Self {
        Self::Backend {
            step,
            resource: resource.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub(super) fn backend_message(
        step: Step,
        resource: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Backend {
            step,
            resource: resource.into(),
            message: message.into(),
            source: None,
        }
    }

    pub(super) fn from_retry(resource: impl Into<String>, err: RetryError<BackendError>) -> Self {
        let RetryError { attempts, last, .. } = err;
        Self::Backend {
            step: Step::RefreshPool,
            resource: resource.into(),
            message: format!("gave up after {attempts} attempt(s): {last}"),
            source: Some(last),
        }
    }

    pub(super) fn from_upload(resource: impl Into<String>, err: UploadError<BackendError>) -> Self {
        let message = err.to_string();
        let source = match err {
            UploadError::Send { source, .. } | UploadError::Finish(source) => Some(source),
            UploadError::Read { .. } | UploadError::ShortSource { .. } => None,
        };
        Self::Backend {
            step: Step::UploadVolume,
            resource: resource.into(),
            message,
            source,
        }
    }
}

impl<BackendError> From<PoolLockError> for ProvisionError<BackendError>
where
    BackendError: std::error::Error + 'static,
{
    fn from(value: PoolLockError) -> Self {
        let PoolLockError::Io {
            action,
            path,
            message,
        } = value;
        Self::Io {
            action: action.to_owned(),
            path,
            message,
        }
    }
}

impl<BackendError> From<ContentError> for ProvisionError<BackendError>
where
    BackendError: std::error::Error + 'static,
{
    fn from(value: ContentError) -> Self {
        match value {
            ContentError::InvalidContent { preview } => Self::InvalidContent { preview },
            ContentError::Io {
                action,
                path,
                message,
            } => Self::Io {
                action,
                path,
                message,
            },
        }
    }
}
