//! Storage backend abstraction for provisioning volumes inside a
//! virtualisation host's storage pools.
//!
//! The provisioner only ever talks to the host through [`StorageBackend`], so
//! the `virsh` implementation and the in-memory test double are
//! interchangeable.

use crate::descriptor::VolumeDescriptor;

/// Handle for a storage pool known to the backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolHandle {
    /// Pool name as reported by the backend.
    pub name: String,
}

impl PoolHandle {
    /// Creates a pool handle from its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Handle returned by the backend for a storage volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeHandle {
    /// Human-readable volume name.
    pub name: String,
    /// Backend-assigned stable key. May be empty when the backend failed to
    /// report one; callers decide whether that is fatal.
    pub key: String,
    /// Pool the volume lives in, when the lookup that produced the handle
    /// reported it.
    pub pool: Option<String>,
}

/// Write side of a streamed volume import.
///
/// Bytes passed to [`VolumeUpload::send`] land in the volume in order,
/// starting at the offset given when the upload was opened. The transfer is
/// only complete once [`VolumeUpload::finish`] succeeds.
pub trait VolumeUpload {
    /// Error raised by the transport.
    type Error;

    /// Sends one chunk to the remote volume.
    ///
    /// # Errors
    ///
    /// Returns the transport error when the chunk cannot be delivered.
    fn send(&mut self, chunk: &[u8]) -> Result<(), Self::Error>;

    /// Completes the transfer and waits for the backend to acknowledge it.
    ///
    /// # Errors
    ///
    /// Returns the transport error when the backend rejects the import.
    fn finish(self) -> Result<(), Self::Error>;
}

/// Operations consumed from the virtualisation host.
///
/// Lookups return `Ok(None)` when the resource does not exist so callers can
/// tell a missing resource apart from a failing backend.
pub trait StorageBackend {
    /// Backend specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Upload stream returned by [`StorageBackend::begin_upload`].
    type Upload: VolumeUpload<Error = Self::Error>;

    /// Looks up a storage pool by name.
    ///
    /// # Errors
    ///
    /// Returns the backend error when the lookup itself fails.
    fn lookup_pool(&self, name: &str) -> Result<Option<PoolHandle>, Self::Error>;

    /// Refreshes the pool so the backend drops cached metadata.
    ///
    /// # Errors
    ///
    /// Returns the backend error when the refresh fails.
    fn refresh_pool(&self, pool: &PoolHandle) -> Result<(), Self::Error>;

    /// Creates a volume in `pool` from `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns the backend error when creation is rejected.
    fn create_volume(
        &self,
        pool: &PoolHandle,
        descriptor: &VolumeDescriptor,
    ) -> Result<VolumeHandle, Self::Error>;

    /// Opens a streamed import of `length` bytes into `volume` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns the backend error when the stream cannot be opened.
    fn begin_upload(
        &self,
        volume: &VolumeHandle,
        offset: u64,
        length: u64,
    ) -> Result<Self::Upload, Self::Error>;

    /// Looks up a volume by its backend key.
    ///
    /// # Errors
    ///
    /// Returns the backend error when the lookup itself fails.
    fn lookup_volume_by_key(&self, key: &str) -> Result<Option<VolumeHandle>, Self::Error>;

    /// Finds the pool owning `volume`.
    ///
    /// # Errors
    ///
    /// Returns the backend error when the owning pool cannot be determined.
    fn lookup_pool_by_volume(&self, volume: &VolumeHandle) -> Result<PoolHandle, Self::Error>;
}
