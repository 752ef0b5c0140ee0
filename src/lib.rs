//! Core library for the `ignivol` ignition volume provisioner.
//!
//! The crate turns ignition content (a file path or an inline JSON object)
//! into a raw volume in a libvirt storage pool and hands back a stable
//! `<volume key>;<uuid>` identifier. Host access goes through the
//! [`StorageBackend`] trait; [`VirshBackend`] drives a real host through the
//! `virsh` command line client.

pub mod backend;
pub mod config;
pub mod content;
pub mod descriptor;
pub mod identifier;
pub mod pool_lock;
pub mod provision;
pub mod retry;
pub mod runner;
pub mod test_support;
pub mod upload;
pub mod virsh;

pub use backend::{PoolHandle, StorageBackend, VolumeHandle, VolumeUpload};
pub use config::{ConfigError, IgnivolConfig};
pub use content::{ContentError, ContentKind, ResolvedSource};
pub use descriptor::VolumeDescriptor;
pub use identifier::{ExternalIdentifier, IdentifierError};
pub use pool_lock::{PoolGuard, PoolLockError, PoolLocks};
pub use provision::{
    ErrorKind, IgnitionRequest, ProvisionError, ProvisionSettings, ResolvedRequest, Session, Step,
    VolumeProvisioner, reverse_resolve,
};
pub use retry::{RetryError, RetryPolicy};
pub use runner::{CommandOutput, CommandRunner, PipedCommand, ProcessCommandRunner, RunnerError};
pub use upload::{MAX_TRANSFER_UNIT, StreamUploader, UploadError};
pub use virsh::{VirshBackend, VirshError, VirshUpload};
