//! Binary entry point for the `ignivol` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use ignivol::{
    ConfigError, IdentifierError, IgnitionRequest, IgnivolConfig, PoolLocks, ProvisionError,
    ProvisionSettings, Session, VirshBackend, VirshError, identifier,
};

mod cli;

use cli::{Cli, CreateCommand, IdentifierCommand};

/// Environment variable holding the log filter directives.
const LOG_ENV: &str = "IGNIVOL_LOG";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("backend error: {0}")]
    Backend(#[from] VirshError),
    #[error(transparent)]
    Provision(#[from] ProvisionError<VirshError>),
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let exit_code = match dispatch(cli) {
        Ok(lines) => {
            write_lines(io::stdout(), &lines);
            0
        }
        Err(err) => {
            write_error(io::stderr(), &err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();
}

fn dispatch(cli: Cli) -> Result<Vec<String>, CliError> {
    match cli {
        Cli::Create(command) => create(command),
        Cli::Resolve(command) => resolve(&command),
        Cli::VolumeKey(command) => Ok(vec![identifier::decode(&command.id)?]),
    }
}

fn create(command: CreateCommand) -> Result<Vec<String>, CliError> {
    let request = IgnitionRequest::new(command.name, command.pool, command.content);
    let session = open_session()?;
    let id = session.create(&request)?;
    Ok(vec![id.to_string()])
}

fn resolve(command: &IdentifierCommand) -> Result<Vec<String>, CliError> {
    identifier::decode(&command.id)?;
    let session = open_session()?;
    let resolved = session.reverse_resolve(&command.id)?;
    Ok(vec![
        format!("name={}", resolved.name),
        format!("pool={}", resolved.pool_name),
    ])
}

fn open_session() -> Result<Session<VirshBackend<ignivol::ProcessCommandRunner>>, CliError> {
    let config = IgnivolConfig::load_without_cli_args()?;
    config.validate()?;
    let backend = VirshBackend::from_config(&config)?;
    let locks = PoolLocks::with_lock_dir(config.pool_lock_dir());
    Ok(Session::with_locks(
        backend,
        ProvisionSettings::from_config(&config),
        locks,
    ))
}

fn write_lines(mut target: impl Write, lines: &[String]) {
    for line in lines {
        writeln!(target, "{line}").ok();
    }
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
