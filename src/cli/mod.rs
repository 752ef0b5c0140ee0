//! Command-line interface definitions for the `ignivol` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `ignivol` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ignivol",
    version,
    about = "Provision ignition volumes in libvirt storage pools",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create a raw volume holding ignition content and print its identifier.
    #[command(
        name = "create",
        about = "Create a raw volume holding ignition content and print its identifier"
    )]
    Create(CreateCommand),
    /// Print the volume name and pool behind an identifier.
    #[command(
        name = "resolve",
        about = "Print the volume name and pool behind an identifier"
    )]
    Resolve(IdentifierCommand),
    /// Print the volume key encoded in an identifier.
    #[command(
        name = "volume-key",
        about = "Print the volume key encoded in an identifier"
    )]
    VolumeKey(IdentifierCommand),
}

/// Arguments for the `ignivol create` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CreateCommand {
    /// Name of the volume to create.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: String,
    /// Storage pool receiving the volume.
    #[arg(long, value_name = "POOL")]
    pub(crate) pool: String,
    /// Path to an ignition file, or an inline JSON object.
    ///
    /// An existing path always wins, even when the value would also parse as
    /// JSON.
    #[arg(long, value_name = "PATH|JSON")]
    pub(crate) content: String,
}

/// Arguments for subcommands that take an external identifier.
#[derive(Debug, Parser)]
pub(crate) struct IdentifierCommand {
    /// Identifier printed by `ignivol create` (`<volume key>;<uuid>`).
    #[arg(value_name = "ID")]
    pub(crate) id: String,
}
