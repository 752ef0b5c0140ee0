//! libvirt storage backend driven through the `virsh` command line client.
//!
//! Every operation runs `virsh -c <uri> <subcommand> ...` through a
//! [`CommandRunner`], so the backend can be exercised against scripted
//! outputs without a libvirt host.

use std::ffi::OsString;
use std::io::Write;

use crate::backend::{PoolHandle, StorageBackend, VolumeHandle, VolumeUpload};
use crate::config::IgnivolConfig;
use crate::descriptor::VolumeDescriptor;
use crate::runner::{CommandOutput, CommandRunner, PipedCommand, ProcessCommandRunner};

mod error;

pub use error::VirshError;

/// Path `virsh vol-upload` reads the payload from.
const UPLOAD_SOURCE: &str = "/dev/stdin";

/// Storage backend that shells out to `virsh`.
#[derive(Clone, Debug)]
pub struct VirshBackend<R: CommandRunner> {
    uri: String,
    virsh_bin: String,
    runner: R,
}

impl VirshBackend<ProcessCommandRunner> {
    /// Creates a backend wired to the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`VirshError::InvalidConfig`] when the URI or binary is blank.
    pub fn from_config(config: &IgnivolConfig) -> Result<Self, VirshError> {
        Self::new(&config.uri, &config.virsh_bin, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> VirshBackend<R> {
    /// Creates a backend, trimming whitespace from the URI and binary path.
    ///
    /// # Errors
    ///
    /// Returns [`VirshError::InvalidConfig`] when either value is blank.
    pub fn new(uri: &str, virsh_bin: &str, runner: R) -> Result<Self, VirshError> {
        let trimmed_uri = uri.trim();
        let trimmed_bin = virsh_bin.trim();
        if trimmed_uri.is_empty() {
            return Err(VirshError::InvalidConfig {
                field: String::from("uri"),
            });
        }
        if trimmed_bin.is_empty() {
            return Err(VirshError::InvalidConfig {
                field: String::from("virsh_bin"),
            });
        }
        Ok(Self {
            uri: trimmed_uri.to_owned(),
            virsh_bin: trimmed_bin.to_owned(),
            runner,
        })
    }

    /// Connection URI used for every command.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn args<I, S>(&self, subcommand: &str, rest: I) -> Vec<OsString>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut args = vec![
            OsString::from("-c"),
            OsString::from(&self.uri),
            OsString::from(subcommand),
        ];
        args.extend(rest.into_iter().map(Into::into));
        args
    }

    fn run<I, S>(&self, subcommand: &str, rest: I) -> Result<CommandOutput, VirshError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args = self.args(subcommand, rest);
        tracing::debug!(program = %self.virsh_bin, subcommand, "running virsh");
        Ok(self.runner.run(&self.virsh_bin, &args)?)
    }

    fn run_checked<I, S>(&self, subcommand: &str, rest: I) -> Result<String, VirshError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let output = self.run(subcommand, rest)?;
        if output.is_success() {
            return Ok(output.stdout);
        }
        Err(self.failure(subcommand, output))
    }

    /// Like [`Self::run_checked`] but maps "not found" failures to `None`.
    fn run_lookup<I, S>(&self, subcommand: &str, rest: I) -> Result<Option<String>, VirshError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let output = self.run(subcommand, rest)?;
        if output.is_success() {
            return Ok(Some(output.stdout));
        }
        if is_not_found(&output.stderr) {
            return Ok(None);
        }
        Err(self.failure(subcommand, output))
    }

    fn failure(&self, subcommand: &str, output: CommandOutput) -> VirshError {
        VirshError::CommandFailure {
            program: self.virsh_bin.clone(),
            subcommand: subcommand.to_owned(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        }
    }
}

impl<R: CommandRunner> StorageBackend for VirshBackend<R> {
    type Error = VirshError;
    type Upload = VirshUpload;

    fn lookup_pool(&self, name: &str) -> Result<Option<PoolHandle>, Self::Error> {
        Ok(self
            .run_lookup("pool-info", [name])?
            .map(|_| PoolHandle::new(name)))
    }

    fn refresh_pool(&self, pool: &PoolHandle) -> Result<(), Self::Error> {
        self.run_checked("pool-refresh", [pool.name.as_str()])?;
        Ok(())
    }

    fn create_volume(
        &self,
        pool: &PoolHandle,
        descriptor: &VolumeDescriptor,
    ) -> Result<VolumeHandle, Self::Error> {
        let staging_error = |err: std::io::Error| VirshError::Descriptor {
            name: descriptor.name.clone(),
            message: err.to_string(),
        };
        let mut staged = tempfile::Builder::new()
            .prefix("ignivol-volume-")
            .suffix(".xml")
            .tempfile()
            .map_err(staging_error)?;
        staged
            .write_all(descriptor.to_xml().as_bytes())
            .and_then(|()| staged.flush())
            .map_err(staging_error)?;

        self.run_checked(
            "vol-create",
            [
                OsString::from(&pool.name),
                staged.path().as_os_str().to_owned(),
            ],
        )?;
        let key = self.run_checked(
            "vol-key",
            ["--pool", pool.name.as_str(), descriptor.name.as_str()],
        )?;

        Ok(VolumeHandle {
            name: descriptor.name.clone(),
            key: key.trim().to_owned(),
            pool: Some(pool.name.clone()),
        })
    }

    fn begin_upload(
        &self,
        volume: &VolumeHandle,
        offset: u64,
        length: u64,
    ) -> Result<Self::Upload, Self::Error> {
        let mut rest = vec![
            String::from("--offset"),
            offset.to_string(),
            String::from("--length"),
            length.to_string(),
        ];
        match &volume.pool {
            Some(pool) => rest.extend([String::from("--pool"), pool.clone(), volume.name.clone()]),
            None => rest.push(volume.key.clone()),
        }
        rest.push(String::from(UPLOAD_SOURCE));

        let args = self.args("vol-upload", rest);
        tracing::debug!(program = %self.virsh_bin, volume = %volume.name, length, "starting virsh upload");
        let pipe = self.runner.spawn_piped(&self.virsh_bin, &args)?;
        Ok(VirshUpload {
            program: self.virsh_bin.clone(),
            volume: volume.name.clone(),
            pipe: Some(pipe),
        })
    }

    fn lookup_volume_by_key(&self, key: &str) -> Result<Option<VolumeHandle>, Self::Error> {
        Ok(self.run_lookup("vol-name", [key])?.map(|name| VolumeHandle {
            name: name.trim().to_owned(),
            key: key.to_owned(),
            pool: None,
        }))
    }

    fn lookup_pool_by_volume(&self, volume: &VolumeHandle) -> Result<PoolHandle, Self::Error> {
        let name = self.run_checked("vol-pool", [volume.key.as_str()])?;
        Ok(PoolHandle::new(name.trim()))
    }
}

/// Streamed import feeding the standard input of `virsh vol-upload`.
///
/// The child process is always reaped: by [`VolumeUpload::finish`], by the
/// first failed [`VolumeUpload::send`], or on drop.
pub struct VirshUpload {
    program: String,
    volume: String,
    pipe: Option<Box<dyn PipedCommand>>,
}

impl std::fmt::Debug for VirshUpload {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("VirshUpload")
            .field("program", &self.program)
            .field("volume", &self.volume)
            .field("running", &self.pipe.is_some())
            .finish_non_exhaustive()
    }
}

impl VirshUpload {
    fn aborted(&self) -> VirshError {
        VirshError::Upload {
            volume: self.volume.clone(),
            message: String::from("upload was already aborted"),
        }
    }

    /// Reaps the child after a broken transfer and appends its stderr to the
    /// pipe error.
    fn abort(&mut self, err: &std::io::Error) -> VirshError {
        let stderr = match self.pipe.take().map(PipedCommand::wait) {
            Some(Ok(output)) => output.stderr.trim().to_owned(),
            Some(Err(wait_err)) => wait_err.to_string(),
            None => String::new(),
        };
        let message = if stderr.is_empty() {
            err.to_string()
        } else {
            format!("{err}: {stderr}")
        };
        VirshError::Upload {
            volume: self.volume.clone(),
            message,
        }
    }
}

impl VolumeUpload for VirshUpload {
    type Error = VirshError;

    fn send(&mut self, chunk: &[u8]) -> Result<(), Self::Error> {
        let Some(pipe) = self.pipe.as_mut() else {
            return Err(self.aborted());
        };
        match pipe.write_all(chunk) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.abort(&err)),
        }
    }

    fn finish(mut self) -> Result<(), Self::Error> {
        let Some(mut pipe) = self.pipe.take() else {
            return Err(self.aborted());
        };
        if let Err(err) = pipe.flush() {
            self.pipe = Some(pipe);
            return Err(self.abort(&err));
        }
        let output = pipe.wait()?;
        if output.is_success() {
            return Ok(());
        }
        Err(VirshError::CommandFailure {
            program: self.program.clone(),
            subcommand: String::from("vol-upload"),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }
}

impl Drop for VirshUpload {
    fn drop(&mut self) {
        let Some(pipe) = self.pipe.take() else {
            return;
        };
        match pipe.wait() {
            Ok(output) => tracing::debug!(
                volume = %self.volume,
                status = %output.status_text(),
                "abandoned virsh upload exited"
            ),
            Err(err) => tracing::warn!(volume = %self.volume, error = %err, "failed to reap virsh upload"),
        }
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("not found")
}
