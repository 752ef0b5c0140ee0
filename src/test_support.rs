//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::ffi::OsString;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::backend::{PoolHandle, StorageBackend, VolumeHandle, VolumeUpload};
use crate::descriptor::VolumeDescriptor;
use crate::runner::{CommandOutput, CommandRunner, PipedCommand, RunnerError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Piped commands take their exit status from the same queue when spawned
/// and record everything written to their standard input.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
    stdin: Rc<RefCell<Vec<u8>>>,
    broken_pipe: Rc<RefCell<bool>>,
    waits: Rc<RefCell<usize>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Bytes written to piped commands so far.
    #[must_use]
    pub fn stdin_bytes(&self) -> Vec<u8> {
        self.stdin.borrow().clone()
    }

    /// Number of piped commands that have been waited on.
    #[must_use]
    pub fn waits(&self) -> usize {
        *self.waits.borrow()
    }

    /// Makes every subsequent write to a piped command fail.
    pub fn break_pipe(&self) {
        *self.broken_pipe.borrow_mut() = true;
    }

    /// Pushes a successful exit status with the given stdout.
    pub fn push_success(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    fn next(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| RunnerError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        self.next(program, args)
    }

    fn spawn_piped(
        &self,
        program: &str,
        args: &[OsString],
    ) -> Result<Box<dyn PipedCommand>, RunnerError> {
        let output = self.next(program, args)?;
        Ok(Box::new(ScriptedPipe {
            output,
            stdin: Rc::clone(&self.stdin),
            broken: Rc::clone(&self.broken_pipe),
            waits: Rc::clone(&self.waits),
        }))
    }
}

struct ScriptedPipe {
    output: CommandOutput,
    stdin: Rc<RefCell<Vec<u8>>>,
    broken: Rc<RefCell<bool>>,
    waits: Rc<RefCell<usize>>,
}

impl Write for ScriptedPipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if *self.broken.borrow() {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.stdin.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PipedCommand for ScriptedPipe {
    fn wait(self: Box<Self>) -> Result<CommandOutput, RunnerError> {
        *self.waits.borrow_mut() += 1;
        Ok(self.output)
    }
}

/// Call observed by [`MemoryBackend`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackendCall {
    /// `lookup_pool` with the requested name.
    LookupPool(String),
    /// `refresh_pool` for the named pool.
    RefreshPool(String),
    /// `create_volume` in `pool`.
    CreateVolume {
        /// Target pool.
        pool: String,
        /// Requested volume name.
        name: String,
        /// Declared capacity.
        capacity_bytes: u64,
    },
    /// `begin_upload` for the named volume.
    BeginUpload {
        /// Volume receiving the data.
        volume: String,
        /// Declared transfer length.
        length: u64,
    },
    /// `lookup_volume_by_key` with the requested key.
    LookupVolumeByKey(String),
    /// `lookup_pool_by_volume` for the given key.
    LookupPoolByVolume(String),
}

/// Error raised by [`MemoryBackend`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("memory backend {operation} failed: {message}")]
pub struct MemoryBackendError {
    /// Operation that failed.
    pub operation: &'static str,
    /// Simulated failure text.
    pub message: String,
}

impl MemoryBackendError {
    fn injected(operation: &'static str) -> Self {
        Self {
            operation,
            message: String::from("injected failure"),
        }
    }
}

/// Volume stored by [`MemoryBackend`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StoredVolume {
    /// Volume name.
    pub name: String,
    /// Owning pool.
    pub pool: String,
    /// Declared capacity.
    pub capacity_bytes: u64,
    /// Bytes committed by finished uploads.
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryState {
    pools: Vec<String>,
    volumes: BTreeMap<String, StoredVolume>,
    calls: Vec<BackendCall>,
    refresh_failures: u32,
    fail_create: bool,
    fail_upload: bool,
    fail_pool_by_volume: bool,
    empty_keys: bool,
    refresh_delay: Duration,
    refreshing: BTreeMap<String, usize>,
    max_refreshing_per_pool: BTreeMap<String, usize>,
    max_refreshing_total: usize,
}

impl MemoryState {
    fn refreshing_total(&self) -> usize {
        self.refreshing.values().sum()
    }
}

/// In-memory [`StorageBackend`] with call recording and failure injection.
///
/// Clones share state, so one clone can be handed to a session while the
/// test keeps another for assertions.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    /// Creates a backend with no pools.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that knows the given pools.
    #[must_use]
    pub fn with_pools(pools: &[&str]) -> Self {
        let backend = Self::new();
        for pool in pools {
            backend.add_pool(pool);
        }
        backend
    }

    /// Registers a pool.
    pub fn add_pool(&self, name: &str) {
        self.state.lock().pools.push(name.to_owned());
    }

    /// Stores a volume directly under `key`, bypassing `create_volume`.
    pub fn insert_volume(&self, key: &str, name: &str, pool: &str) {
        self.state.lock().volumes.insert(
            key.to_owned(),
            StoredVolume {
                name: name.to_owned(),
                pool: pool.to_owned(),
                ..StoredVolume::default()
            },
        );
    }

    /// Makes the next `count` pool refreshes fail.
    pub fn fail_refreshes(&self, count: u32) {
        self.state.lock().refresh_failures = count;
    }

    /// Makes every volume creation fail.
    pub fn fail_create(&self) {
        self.state.lock().fail_create = true;
    }

    /// Makes every upload chunk fail.
    pub fn fail_upload(&self) {
        self.state.lock().fail_upload = true;
    }

    /// Makes owning-pool lookups fail.
    pub fn fail_pool_by_volume(&self) {
        self.state.lock().fail_pool_by_volume = true;
    }

    /// Makes created volumes report an empty key.
    pub fn return_empty_keys(&self) {
        self.state.lock().empty_keys = true;
    }

    /// Makes each pool refresh sleep for `delay`.
    pub fn delay_refreshes(&self, delay: Duration) {
        self.state.lock().refresh_delay = delay;
    }

    /// Snapshot of every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    /// Snapshot of the stored volumes keyed by volume key.
    #[must_use]
    pub fn volumes(&self) -> BTreeMap<String, StoredVolume> {
        self.state.lock().volumes.clone()
    }

    /// Highest number of simultaneous refreshes observed for `pool`.
    #[must_use]
    pub fn max_concurrent_refreshes(&self, pool: &str) -> usize {
        self.state
            .lock()
            .max_refreshing_per_pool
            .get(pool)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of simultaneous refreshes observed across all pools.
    #[must_use]
    pub fn max_concurrent_refreshes_total(&self) -> usize {
        self.state.lock().max_refreshing_total
    }

    fn record(&self, call: BackendCall) {
        self.state.lock().calls.push(call);
    }
}

impl StorageBackend for MemoryBackend {
    type Error = MemoryBackendError;
    type Upload = MemoryUpload;

    fn lookup_pool(&self, name: &str) -> Result<Option<PoolHandle>, Self::Error> {
        self.record(BackendCall::LookupPool(name.to_owned()));
        let state = self.state.lock();
        Ok(state
            .pools
            .iter()
            .any(|pool| pool == name)
            .then(|| PoolHandle::new(name)))
    }

    fn refresh_pool(&self, pool: &PoolHandle) -> Result<(), Self::Error> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.push(BackendCall::RefreshPool(pool.name.clone()));
            let in_pool = {
                let entry = state.refreshing.entry(pool.name.clone()).or_default();
                *entry += 1;
                *entry
            };
            let total = state.refreshing_total();
            let peak = state
                .max_refreshing_per_pool
                .entry(pool.name.clone())
                .or_default();
            *peak = (*peak).max(in_pool);
            state.max_refreshing_total = state.max_refreshing_total.max(total);
            state.refresh_delay
        };

        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let mut state = self.state.lock();
        if let Some(count) = state.refreshing.get_mut(&pool.name) {
            *count = count.saturating_sub(1);
        }
        if state.refresh_failures > 0 {
            state.refresh_failures -= 1;
            return Err(MemoryBackendError::injected("refresh"));
        }
        Ok(())
    }

    fn create_volume(
        &self,
        pool: &PoolHandle,
        descriptor: &VolumeDescriptor,
    ) -> Result<VolumeHandle, Self::Error> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::CreateVolume {
            pool: pool.name.clone(),
            name: descriptor.name.clone(),
            capacity_bytes: descriptor.capacity_bytes,
        });
        if state.fail_create {
            return Err(MemoryBackendError::injected("create"));
        }
        let key = format!("{}/{}", pool.name, descriptor.name);
        state.volumes.insert(
            key.clone(),
            StoredVolume {
                name: descriptor.name.clone(),
                pool: pool.name.clone(),
                capacity_bytes: descriptor.capacity_bytes,
                data: Vec::new(),
            },
        );
        Ok(VolumeHandle {
            name: descriptor.name.clone(),
            key: if state.empty_keys { String::new() } else { key },
            pool: Some(pool.name.clone()),
        })
    }

    fn begin_upload(
        &self,
        volume: &VolumeHandle,
        offset: u64,
        length: u64,
    ) -> Result<Self::Upload, Self::Error> {
        self.record(BackendCall::BeginUpload {
            volume: volume.name.clone(),
            length,
        });
        let key = match &volume.pool {
            Some(pool) => format!("{pool}/{}", volume.name),
            None => volume.key.clone(),
        };
        Ok(MemoryUpload {
            state: Arc::clone(&self.state),
            key,
            offset,
            buffer: Vec::new(),
        })
    }

    fn lookup_volume_by_key(&self, key: &str) -> Result<Option<VolumeHandle>, Self::Error> {
        let mut state = self.state.lock();
        state
            .calls
            .push(BackendCall::LookupVolumeByKey(key.to_owned()));
        Ok(state.volumes.get(key).map(|volume| VolumeHandle {
            name: volume.name.clone(),
            key: key.to_owned(),
            pool: None,
        }))
    }

    fn lookup_pool_by_volume(&self, volume: &VolumeHandle) -> Result<PoolHandle, Self::Error> {
        let mut state = self.state.lock();
        state
            .calls
            .push(BackendCall::LookupPoolByVolume(volume.key.clone()));
        if state.fail_pool_by_volume {
            return Err(MemoryBackendError::injected("lookup pool by volume"));
        }
        state
            .volumes
            .get(&volume.key)
            .map(|stored| PoolHandle::new(stored.pool.clone()))
            .ok_or_else(|| MemoryBackendError {
                operation: "lookup pool by volume",
                message: format!("no volume with key {}", volume.key),
            })
    }
}

/// Upload stream created by [`MemoryBackend::begin_upload`].
#[derive(Debug)]
pub struct MemoryUpload {
    state: Arc<Mutex<MemoryState>>,
    key: String,
    offset: u64,
    buffer: Vec<u8>,
}

impl VolumeUpload for MemoryUpload {
    type Error = MemoryBackendError;

    fn send(&mut self, chunk: &[u8]) -> Result<(), Self::Error> {
        if self.state.lock().fail_upload {
            return Err(MemoryBackendError::injected("upload"));
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    fn finish(self) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        let volume = state
            .volumes
            .get_mut(&self.key)
            .ok_or_else(|| MemoryBackendError {
                operation: "upload",
                message: format!("no volume with key {}", self.key),
            })?;
        let start = usize::try_from(self.offset).map_err(|err| MemoryBackendError {
            operation: "upload",
            message: err.to_string(),
        })?;
        if volume.data.len() < start {
            volume.data.resize(start, 0);
        }
        volume.data.truncate(start);
        volume.data.extend_from_slice(&self.buffer);
        Ok(())
    }
}
