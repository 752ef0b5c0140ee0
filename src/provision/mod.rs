//! Ignition volume provisioning.
//!
//! [`VolumeProvisioner::create`] turns an [`IgnitionRequest`] into a raw
//! volume holding the ignition payload and returns the identifier the caller
//! persists. [`reverse_resolve`] walks the other way, from a persisted
//! identifier back to the volume name and pool.
//!
//! Creation holds the pool lock from the pool lookup until the identifier is
//! built, so concurrent creations in one pool never interleave. Content is
//! classified before the lock is taken; a string that is neither an existing
//! file nor a JSON object is rejected without touching the backend.
//!
//! No rollback is attempted: a volume whose upload fails stays in the pool.

use crate::backend::{PoolHandle, StorageBackend, VolumeHandle};
use crate::config::IgnivolConfig;
use crate::content::{self, ResolvedSource};
use crate::descriptor::VolumeDescriptor;
use crate::identifier::{self, ExternalIdentifier};
use crate::pool_lock::PoolLocks;
use crate::retry::RetryPolicy;
use crate::upload::StreamUploader;

mod error;

pub use error::{ErrorKind, ProvisionError, Step};

/// Inputs for one ignition volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IgnitionRequest {
    /// Name of the volume to create.
    pub name: String,
    /// Storage pool receiving the volume.
    pub pool_name: String,
    /// Path to an ignition file, or an inline JSON object.
    pub content: String,
}

impl IgnitionRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        pool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            pool_name: pool_name.into(),
            content: content.into(),
        }
    }
}

/// Request fields recovered from an external identifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedRequest {
    /// Volume name.
    pub name: String,
    /// Pool owning the volume.
    pub pool_name: String,
}

/// Tunables for the provisioning workflow.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProvisionSettings {
    /// Retry policy for the pool refresh.
    pub refresh: RetryPolicy,
    /// Uploader used to stream the payload.
    pub uploader: StreamUploader,
}

impl ProvisionSettings {
    /// Derives settings from loaded configuration.
    #[must_use]
    pub fn from_config(config: &IgnivolConfig) -> Self {
        Self {
            refresh: config.refresh_policy(),
            uploader: config.uploader(),
        }
    }
}

/// Backend connection plus the pool lock registry shared by every
/// provisioner created from it.
#[derive(Debug)]
pub struct Session<B> {
    backend: B,
    locks: PoolLocks,
    settings: ProvisionSettings,
}

impl<B: StorageBackend> Session<B> {
    /// Creates a session around `backend` whose pool locks only order
    /// callers within this process.
    #[must_use]
    pub fn new(backend: B, settings: ProvisionSettings) -> Self {
        Self::with_locks(backend, settings, PoolLocks::new())
    }

    /// Creates a session around `backend` using `locks`, typically a
    /// registry from [`PoolLocks::with_lock_dir`] so separate processes
    /// provisioning into one pool are ordered too.
    #[must_use]
    pub const fn with_locks(backend: B, settings: ProvisionSettings, locks: PoolLocks) -> Self {
        Self {
            backend,
            locks,
            settings,
        }
    }

    /// Backend used by this session.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Pool lock registry shared by this session's provisioners.
    #[must_use]
    pub const fn locks(&self) -> &PoolLocks {
        &self.locks
    }

    /// Returns a provisioner bound to this session.
    #[must_use]
    pub const fn provisioner(&self) -> VolumeProvisioner<'_, B> {
        VolumeProvisioner {
            backend: &self.backend,
            locks: &self.locks,
            settings: self.settings,
        }
    }

    /// Shorthand for `self.provisioner().create(request)`.
    ///
    /// # Errors
    ///
    /// See [`VolumeProvisioner::create`].
    pub fn create(
        &self,
        request: &IgnitionRequest,
    ) -> Result<ExternalIdentifier, ProvisionError<B::Error>> {
        self.provisioner().create(request)
    }

    /// Shorthand for [`reverse_resolve`] against this session's backend.
    ///
    /// # Errors
    ///
    /// See [`reverse_resolve`].
    pub fn reverse_resolve(&self, id: &str) -> Result<ResolvedRequest, ProvisionError<B::Error>> {
        reverse_resolve(&self.backend, id)
    }
}

/// Creates ignition volumes.
#[derive(Debug)]
pub struct VolumeProvisioner<'session, B> {
    backend: &'session B,
    locks: &'session PoolLocks,
    settings: ProvisionSettings,
}

impl<B: StorageBackend> VolumeProvisioner<'_, B> {
    /// Creates a raw volume named `request.name` in `request.pool_name`,
    /// fills it with the ignition payload, and returns a fresh external
    /// identifier for it.
    ///
    /// The temporary copy of the payload is removed on every path.
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::InvalidContent`] when the content is neither an
    ///   existing file nor a JSON object. No backend call is made.
    /// - [`ProvisionError::NotFound`] when the pool does not exist.
    /// - [`ProvisionError::Io`] when the pool lock file cannot be taken or
    ///   the temporary copy cannot be written.
    /// - [`ProvisionError::Backend`] when the refresh retries are exhausted,
    ///   creation or upload fails, or the new volume has no key. A volume
    ///   whose upload failed is left in the pool.
    pub fn create(
        &self,
        request: &IgnitionRequest,
    ) -> Result<ExternalIdentifier, ProvisionError<B::Error>> {
        let kind = content::classify(&request.content)?;

        let guard = self.locks.acquire(&request.pool_name)?;

        let pool = self.lookup_pool(&request.pool_name)?;
        self.settings
            .refresh
            .run("refresh pool", || self.backend.refresh_pool(&pool))
            .map_err(|err| ProvisionError::from_retry(&pool.name, err))?;

        let source = content::materialize(&kind, &request.name)?;
        tracing::debug!(
            path = %source.path().display(),
            size_bytes = source.size_bytes(),
            "ignition payload staged"
        );

        let descriptor = VolumeDescriptor::raw(&request.name, source.size_bytes());
        let volume = self
            .backend
            .create_volume(&pool, &descriptor)
            .map_err(|err| ProvisionError::backend(Step::CreateVolume, &request.name, err))?;

        self.upload(&source, &volume)?;

        if volume.key.is_empty() {
            return Err(ProvisionError::backend_message(
                Step::ReadVolumeKey,
                &volume.name,
                "missing key",
            ));
        }
        let id = ExternalIdentifier::generate(volume.key);

        drop(source);
        guard.release();
        tracing::info!(
            pool = %pool.name,
            name = %volume.name,
            id = %id,
            "ignition volume created"
        );
        Ok(id)
    }

    fn lookup_pool(&self, name: &str) -> Result<PoolHandle, ProvisionError<B::Error>> {
        self.backend
            .lookup_pool(name)
            .map_err(|err| ProvisionError::backend(Step::LookupPool, name, err))?
            .ok_or_else(|| ProvisionError::NotFound {
                resource: "pool",
                name: name.to_owned(),
            })
    }

    fn upload(
        &self,
        source: &ResolvedSource,
        volume: &VolumeHandle,
    ) -> Result<(), ProvisionError<B::Error>> {
        let temp_path = source.path().display().to_string();
        let file = source.open().map_err(|err| ProvisionError::Io {
            action: String::from("open ignition copy"),
            path: temp_path.clone(),
            message: err.to_string(),
        })?;
        let upload = self
            .backend
            .begin_upload(volume, 0, source.size_bytes())
            .map_err(|err| ProvisionError::backend(Step::UploadVolume, &temp_path, err))?;
        let sent = self
            .settings
            .uploader
            .upload(file, upload, source.size_bytes())
            .map_err(|err| ProvisionError::from_upload(&temp_path, err))?;
        tracing::debug!(volume = %volume.name, bytes = sent, "ignition payload uploaded");
        Ok(())
    }
}

/// Recovers the volume name and pool from an external identifier.
///
/// Only the volume key part of the identifier is consulted.
///
/// # Errors
///
/// - [`ProvisionError::IdentifierFormat`] when `id` is malformed.
/// - [`ProvisionError::NotFound`] when no volume has the key.
/// - [`ProvisionError::Backend`] when a lookup fails or returns an empty
///   volume or pool name.
pub fn reverse_resolve<B: StorageBackend>(
    backend: &B,
    id: &str,
) -> Result<ResolvedRequest, ProvisionError<B::Error>> {
    let key = identifier::decode(id)?;

    let volume = backend
        .lookup_volume_by_key(&key)
        .map_err(|err| ProvisionError::backend(Step::LookupVolume, &key, err))?
        .ok_or_else(|| ProvisionError::NotFound {
            resource: "volume",
            name: key.clone(),
        })?;
    if volume.name.is_empty() {
        return Err(ProvisionError::backend_message(
            Step::LookupVolume,
            &key,
            "volume has no name",
        ));
    }

    let pool = backend
        .lookup_pool_by_volume(&volume)
        .map_err(|err| ProvisionError::backend(Step::LookupPoolByVolume, &volume.name, err))?;
    if pool.name.is_empty() {
        return Err(ProvisionError::backend_message(
            Step::LookupPoolByVolume,
            &volume.name,
            "pool has no name",
        ));
    }

    Ok(ResolvedRequest {
        name: volume.name,
        pool_name: pool.name,
    })
}
