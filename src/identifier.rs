//! External identifier handed back to the caller after provisioning.
//!
//! The wire format is `<volume key>;<uuid>`. The key is the backend's stable
//! volume key and is the only part used to find the volume again. The UUID is
//! generated fresh for every creation so each provisioning event gets its own
//! identity, and it is carried through parsing without being validated.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

/// Separator between the volume key and the uniqueness token.
pub const SEPARATOR: char = ';';

/// Raised when an identifier does not follow the `<key>;<token>` format.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{id} is not a valid ignition volume identifier")]
pub struct IdentifierError {
    /// The rejected identifier.
    pub id: String,
}

/// Parsed external identifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExternalIdentifier {
    volume_key: String,
    token: String,
}

impl ExternalIdentifier {
    /// Builds an identifier for `volume_key` with a fresh random token.
    #[must_use]
    pub fn generate(volume_key: impl Into<String>) -> Self {
        Self {
            volume_key: volume_key.into(),
            token: Uuid::new_v4().to_string(),
        }
    }

    /// Parses an identifier, splitting on the first separator.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the separator is missing or either
    /// side of it is empty.
    pub fn parse(id: &str) -> Result<Self, IdentifierError> {
        match id.split_once(SEPARATOR) {
            Some((key, token)) if !key.is_empty() && !token.is_empty() => Ok(Self {
                volume_key: key.to_owned(),
                token: token.to_owned(),
            }),
            _ => Err(IdentifierError { id: id.to_owned() }),
        }
    }

    /// Backend volume key.
    #[must_use]
    pub fn volume_key(&self) -> &str {
        &self.volume_key
    }

    /// Uniqueness token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Display for ExternalIdentifier {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}{SEPARATOR}{}", self.volume_key, self.token)
    }
}

impl FromStr for ExternalIdentifier {
    type Err = IdentifierError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

/// Returns the wire form of a fresh identifier for `volume_key`.
#[must_use]
pub fn encode(volume_key: &str) -> String {
    ExternalIdentifier::generate(volume_key).to_string()
}

/// Extracts the volume key from an identifier.
///
/// # Errors
///
/// Returns [`IdentifierError`] for malformed identifiers.
pub fn decode(id: &str) -> Result<String, IdentifierError> {
    ExternalIdentifier::parse(id).map(|parsed| parsed.volume_key)
}
