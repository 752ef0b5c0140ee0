//! Shared fixtures for provisioning BDD scenarios.

use std::cell::RefCell;
use std::path::PathBuf;
use std::time::Duration;

use ignivol::test_support::MemoryBackend;
use ignivol::{
    ErrorKind, ExternalIdentifier, ProvisionError, ProvisionSettings, ResolvedRequest,
    RetryPolicy, Session, StreamUploader,
};
use rstest::fixture;
use tempfile::TempDir;

/// Failure captured from the last operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl<E> From<ProvisionError<E>> for Failure
where
    E: std::error::Error + 'static,
{
    fn from(err: ProvisionError<E>) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Per-scenario state shared between steps.
pub struct ProvisionWorld {
    pub backend: MemoryBackend,
    pub session: Session<MemoryBackend>,
    pub scratch: TempDir,
    pub ignition_file: RefCell<Option<PathBuf>>,
    pub created: RefCell<Option<ExternalIdentifier>>,
    pub resolved: RefCell<Option<ResolvedRequest>>,
    pub failure: RefCell<Option<Failure>>,
}

impl ProvisionWorld {
    pub fn record_failure<E>(&self, err: ProvisionError<E>)
    where
        E: std::error::Error + 'static,
    {
        self.failure.replace(Some(Failure::from(err)));
    }
}

#[fixture]
pub fn provision_world() -> ProvisionWorld {
    let backend = MemoryBackend::new();
    let settings = ProvisionSettings {
        refresh: RetryPolicy::new(3, Duration::ZERO),
        uploader: StreamUploader::new(100),
    };
    ProvisionWorld {
        session: Session::new(backend.clone(), settings),
        backend,
        scratch: TempDir::new()
            .unwrap_or_else(|err| panic!("scratch dir should be created: {err}")),
        ignition_file: RefCell::new(None),
        created: RefCell::new(None),
        resolved: RefCell::new(None),
        failure: RefCell::new(None),
    }
}
