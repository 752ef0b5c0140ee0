//! Chunked streaming of a local payload into a remote volume.

use std::io::{ErrorKind, Read};

use thiserror::Error;

use crate::backend::VolumeUpload;

/// Largest chunk handed to the transport in one call. libvirt rejects stream
/// messages with a payload above 256 KiB.
pub const MAX_TRANSFER_UNIT: usize = 256 * 1024;

/// Errors raised while streaming a payload.
#[derive(Debug, Error)]
pub enum UploadError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the local source cannot be read.
    #[error("failed to read local source at offset {offset}: {message}")]
    Read {
        /// Offset at which the read failed.
        offset: u64,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the source ends before the declared capacity.
    #[error("source ended after {transferred} of {expected} bytes")]
    ShortSource {
        /// Declared capacity.
        expected: u64,
        /// Bytes actually transferred.
        transferred: u64,
    },
    /// Raised when the transport rejects a chunk.
    #[error("failed to send chunk at offset {offset}: {source}")]
    Send {
        /// Offset of the rejected chunk.
        offset: u64,
        /// Transport error.
        #[source]
        source: E,
    },
    /// Raised when the transport fails to complete the transfer.
    #[error("failed to complete upload: {0}")]
    Finish(#[source] E),
}

/// Copies exactly `capacity` bytes from a reader into a [`VolumeUpload`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamUploader {
    chunk_size: usize,
}

impl Default for StreamUploader {
    fn default() -> Self {
        Self {
            chunk_size: MAX_TRANSFER_UNIT,
        }
    }
}

impl StreamUploader {
    /// Creates an uploader; `chunk_size` is clamped to
    /// `1..=MAX_TRANSFER_UNIT`.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(1, MAX_TRANSFER_UNIT),
        }
    }

    /// Effective chunk size.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Streams `capacity` bytes from `source` into `upload` and finishes the
    /// transfer. Bytes beyond `capacity` are never read. Returns the number
    /// of bytes sent, which always equals `capacity` on success.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::ShortSource`] when `source` ends early, and the
    /// other [`UploadError`] variants for read or transport failures.
    pub fn upload<R, U>(
        &self,
        source: R,
        mut upload: U,
        capacity: u64,
    ) -> Result<u64, UploadError<U::Error>>
    where
        R: Read,
        U: VolumeUpload,
        U::Error: std::error::Error + 'static,
    {
        let mut bounded = source.take(capacity);
        let mut buffer = vec![0_u8; self.chunk_size];
        let mut offset: u64 = 0;

        while offset < capacity {
            let read = match bounded.read(&mut buffer) {
                Ok(0) => {
                    return Err(UploadError::ShortSource {
                        expected: capacity,
                        transferred: offset,
                    });
                }
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(UploadError::Read {
                        offset,
                        message: err.to_string(),
                    });
                }
            };
            let chunk = buffer.get(..read).unwrap_or_default();
            upload
                .send(chunk)
                .map_err(|source| UploadError::Send { offset, source })?;
            offset += read as u64;
            tracing::trace!(offset, capacity, "chunk sent");
        }

        upload.finish().map_err(UploadError::Finish)?;
        Ok(offset)
    }
}
