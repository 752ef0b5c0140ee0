//! Error types for the `virsh` backend.

use thiserror::Error;

use crate::runner::RunnerError;

/// Errors raised by the `virsh` backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VirshError {
    /// Raised when the backend is configured with a blank value.
    #[error("missing {field}")]
    InvalidConfig {
        /// Name of the missing or invalid field.
        field: String,
    },
    /// Raised when `virsh` returns a non-zero exit status.
    #[error("{program} {subcommand} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed (typically `virsh`).
        program: String,
        /// `virsh` subcommand that was run.
        subcommand: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when the volume descriptor cannot be staged on disk.
    #[error("failed to stage volume descriptor for {name}: {message}")]
    Descriptor {
        /// Volume name.
        name: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the upload pipe to `virsh` breaks.
    #[error("failed to stream data into volume {volume}: {message}")]
    Upload {
        /// Volume receiving the data.
        volume: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when command execution fails.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}
