//! Command runner abstraction so backends that shell out can be driven by
//! fakes in tests.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};

use thiserror::Error;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human readable exit status.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised while starting or talking to a command.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunnerError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when waiting for a spawned command fails.
    #[error("failed to wait for {program}: {message}")]
    Wait {
        /// Command being waited on.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Running command whose standard input is fed by the caller.
pub trait PipedCommand: Write {
    /// Closes standard input and waits for the command to exit.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Wait`] when the exit status cannot be
    /// collected.
    fn wait(self: Box<Self>) -> Result<CommandOutput, RunnerError>;
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError>;

    /// Starts `program` with a writable standard input.
    ///
    /// Standard output is discarded; standard error is collected in the
    /// background and reported by [`PipedCommand::wait`].
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started.
    fn spawn_piped(
        &self,
        program: &str,
        args: &[OsString],
    ) -> Result<Box<dyn PipedCommand>, RunnerError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| RunnerError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn_piped(
        &self,
        program: &str,
        args: &[OsString],
    ) -> Result<Box<dyn PipedCommand>, RunnerError> {
        let spawn_error = |message: String| RunnerError::Spawn {
            program: program.to_owned(),
            message,
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(err.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error(String::from("standard input was not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error(String::from("standard error was not captured")))?;
        let stderr_reader = thread::spawn(move || {
            let mut source = stderr;
            let mut bytes = Vec::new();
            source.read_to_end(&mut bytes).map(|_| bytes)
        });

        Ok(Box::new(ProcessPipe {
            program: program.to_owned(),
            child,
            stdin: Some(stdin),
            stderr_reader,
        }))
    }
}

struct ProcessPipe {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_reader: JoinHandle<io::Result<Vec<u8>>>,
}

impl Write for ProcessPipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write(buf),
            None => Err(io::Error::from(io::ErrorKind::BrokenPipe)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

impl PipedCommand for ProcessPipe {
    fn wait(self: Box<Self>) -> Result<CommandOutput, RunnerError> {
        let Self {
            program,
            mut child,
            stdin,
            stderr_reader,
        } = *self;
        drop(stdin);
        let wait_error = |message: String| RunnerError::Wait {
            program: program.clone(),
            message,
        };
        let status = child.wait().map_err(|err| wait_error(err.to_string()))?;
        let stderr = stderr_reader
            .join()
            .map_err(|_| wait_error(String::from("standard error reader panicked")))?
            .map_err(|err| wait_error(err.to_string()))?;

        Ok(CommandOutput {
            code: status.code(),
            stdout: String::new(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}
