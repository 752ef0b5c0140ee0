//! Configuration loading via `ortho-config`.

use std::env;
use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::upload::{MAX_TRANSFER_UNIT, StreamUploader};

/// Connection and provisioning settings derived from defaults, configuration
/// files, and environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "IGNIVOL",
    discovery(
        app_name = "ignivol",
        env_var = "IGNIVOL_CONFIG_PATH",
        config_file_name = "ignivol.toml",
        dotfile_name = ".ignivol.toml",
        project_file_name = "ignivol.toml"
    )
)]
pub struct IgnivolConfig {
    /// libvirt connection URI passed to `virsh -c`.
    #[ortho_config(default = "qemu:///system".to_owned())]
    pub uri: String,
    /// Path to the `virsh` executable.
    #[ortho_config(default = "virsh".to_owned())]
    pub virsh_bin: String,
    /// Number of pool refresh attempts before provisioning gives up.
    #[ortho_config(default = 5)]
    pub refresh_attempts: u32,
    /// Pause between pool refresh attempts, in milliseconds.
    #[ortho_config(default = 1000)]
    pub refresh_backoff_ms: u64,
    /// Upload chunk size in bytes, clamped to the transport maximum.
    #[ortho_config(default = 262_144)]
    pub upload_chunk_bytes: u64,
    /// Directory holding the per-pool lock files shared by concurrent
    /// `ignivol` processes. See [`IgnivolConfig::pool_lock_dir`] for the
    /// fallback when unset.
    pub lock_dir: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to ignivol.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

impl IgnivolConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("ignivol")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide the value via environment variables or configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a string field is blank or
    /// a count is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (
                self.uri.trim().is_empty(),
                FieldMetadata::new("libvirt connection URI", "IGNIVOL_URI", "uri"),
            ),
            (
                self.virsh_bin.trim().is_empty(),
                FieldMetadata::new("virsh executable", "IGNIVOL_VIRSH_BIN", "virsh_bin"),
            ),
            (
                self.refresh_attempts == 0,
                FieldMetadata::new(
                    "pool refresh attempt count",
                    "IGNIVOL_REFRESH_ATTEMPTS",
                    "refresh_attempts",
                ),
            ),
            (
                self.lock_dir
                    .as_deref()
                    .is_some_and(|dir| dir.trim().is_empty()),
                FieldMetadata::new("pool lock directory", "IGNIVOL_LOCK_DIR", "lock_dir"),
            ),
            (
                self.upload_chunk_bytes == 0,
                FieldMetadata::new(
                    "upload chunk size",
                    "IGNIVOL_UPLOAD_CHUNK_BYTES",
                    "upload_chunk_bytes",
                ),
            ),
        ];

        match checks.into_iter().find(|(failed, _)| *failed) {
            Some((_, metadata)) => Err(metadata.missing()),
            None => Ok(()),
        }
    }

    /// Retry policy applied to pool refreshes.
    #[must_use]
    pub fn refresh_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.refresh_attempts,
            Duration::from_millis(self.refresh_backoff_ms),
        )
    }

    /// Uploader using the configured chunk size.
    #[must_use]
    pub fn uploader(&self) -> StreamUploader {
        let chunk = usize::try_from(self.upload_chunk_bytes).unwrap_or(MAX_TRANSFER_UNIT);
        StreamUploader::new(chunk)
    }

    /// Directory for the per-pool lock files.
    ///
    /// Uses `lock_dir` when set, then `$XDG_RUNTIME_DIR/ignivol`, then a
    /// per-user `ignivol-<user>` directory under the system temp directory.
    #[must_use]
    pub fn pool_lock_dir(&self) -> Utf8PathBuf {
        self.pool_lock_dir_from(|key| env::var(key).ok())
    }

    fn pool_lock_dir_from(&self, lookup: impl Fn(&str) -> Option<String>) -> Utf8PathBuf {
        if let Some(dir) = self.lock_dir.as_deref().map(str::trim).filter(|dir| !dir.is_empty()) {
            return Utf8PathBuf::from(dir);
        }
        let present = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(runtime) = present("XDG_RUNTIME_DIR") {
            return Utf8PathBuf::from(runtime).join("ignivol");
        }
        let temp = Utf8PathBuf::from_path_buf(env::temp_dir())
            .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
        present("USER").map_or_else(
            || temp.join("ignivol"),
            |user| temp.join(format!("ignivol-{user}")),
        )
    }

    /// Returns the built-in defaults without consulting any source.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            uri: String::from("qemu:///system"),
            virsh_bin: String::from("virsh"),
            refresh_attempts: crate::retry::DEFAULT_ATTEMPTS,
            refresh_backoff_ms: 1000,
            upload_chunk_bytes: 262_144,
            lock_dir: None,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let config = IgnivolConfig::with_defaults();
        assert!(config.validate().is_ok());
        assert_eq!(config.refresh_policy(), RetryPolicy::default());
        assert_eq!(config.uploader(), StreamUploader::default());
    }

    #[rstest]
    #[case(IgnivolConfig { uri: String::from("  "), ..IgnivolConfig::with_defaults() }, "IGNIVOL_URI")]
    #[case(IgnivolConfig { virsh_bin: String::new(), ..IgnivolConfig::with_defaults() }, "IGNIVOL_VIRSH_BIN")]
    #[case(IgnivolConfig { refresh_attempts: 0, ..IgnivolConfig::with_defaults() }, "IGNIVOL_REFRESH_ATTEMPTS")]
    #[case(IgnivolConfig { upload_chunk_bytes: 0, ..IgnivolConfig::with_defaults() }, "IGNIVOL_UPLOAD_CHUNK_BYTES")]
    #[case(IgnivolConfig { lock_dir: Some(String::from(" ")), ..IgnivolConfig::with_defaults() }, "IGNIVOL_LOCK_DIR")]
    fn validate_names_the_variable_to_set(#[case] config: IgnivolConfig, #[case] env_var: &str) {
        let err = config.validate().expect_err("config should be rejected");
        let ConfigError::MissingField(message) = err else {
            panic!("expected missing field error");
        };
        assert!(message.contains(env_var), "message: {message}");
    }

    #[test]
    fn oversized_chunk_is_clamped() {
        let config = IgnivolConfig {
            upload_chunk_bytes: 10 * 1024 * 1024,
            ..IgnivolConfig::with_defaults()
        };
        assert_eq!(config.uploader().chunk_size(), MAX_TRANSFER_UNIT);
    }

    fn env_of<'pairs>(pairs: &'pairs [(&str, &str)]) -> impl Fn(&str) -> Option<String> + 'pairs {
        move |key| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_owned())
        }
    }

    #[rstest]
    #[case(Some("/srv/locks"), &[("XDG_RUNTIME_DIR", "/run/user/1000")], "/srv/locks")]
    #[case(None, &[("XDG_RUNTIME_DIR", "/run/user/1000"), ("USER", "ops")], "/run/user/1000/ignivol")]
    #[case(Some("  "), &[("XDG_RUNTIME_DIR", "/run/user/0")], "/run/user/0/ignivol")]
    fn pool_lock_dir_prefers_explicit_then_runtime_dir(
        #[case] lock_dir: Option<&str>,
        #[case] env: &[(&str, &str)],
        #[case] expected: &str,
    ) {
        let config = IgnivolConfig {
            lock_dir: lock_dir.map(str::to_owned),
            ..IgnivolConfig::with_defaults()
        };
        assert_eq!(config.pool_lock_dir_from(env_of(env)), Utf8PathBuf::from(expected));
    }

    #[test]
    fn pool_lock_dir_falls_back_to_per_user_temp_dir() {
        let config = IgnivolConfig::with_defaults();
        let dir = config.pool_lock_dir_from(env_of(&[("XDG_RUNTIME_DIR", ""), ("USER", "ops")]));
        assert_eq!(dir.file_name(), Some("ignivol-ops"));
        let anonymous = config.pool_lock_dir_from(env_of(&[]));
        assert_eq!(anonymous.file_name(), Some("ignivol"));
    }
}
