//! Byte length of a resolved ignition source.

use std::path::Path;

use super::ContentError;

/// Returns the exact number of bytes stored at `path`.
///
/// This is the capacity declared for the remote volume, so it must be taken
/// after the temporary file has been fully written.
///
/// # Errors
///
/// Returns [`ContentError::Io`] when the file cannot be inspected.
pub fn volume_size(path: &Path) -> Result<u64, ContentError> {
    std::fs::metadata(path)
        .map(|metadata| metadata.len())
        .map_err(|err| ContentError::io("read size of", path.display(), &err))
}
