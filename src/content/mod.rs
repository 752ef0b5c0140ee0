//! Ignition content resolution.
//!
//! Ignition content reaches the provisioner as a single string that is either
//! a path to an existing file or an inline JSON object. Resolution happens in
//! two steps: [`classify`] decides which of the two the string is, and
//! [`materialize`] copies the bytes into a temporary file that is removed when
//! the returned [`ResolvedSource`] is dropped.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use serde_json::{Map, Value};
use tempfile::{Builder, TempPath};

mod error;
mod sizer;

pub use error::ContentError;
pub use sizer::volume_size;

const PREVIEW_CHARS: usize = 64;
const DEFAULT_TEMP_PREFIX: &str = "ignition";

/// Interpretation chosen for a content string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContentKind {
    /// The string names an existing file; its bytes are copied verbatim.
    FilePath(Utf8PathBuf),
    /// The string is itself a JSON object and is written as-is.
    InlineText(String),
}

/// Classifies `content` as a file path or inline JSON.
///
/// An existing path always wins, even when the string would also parse as
/// JSON. Inline text must be a JSON object; arrays and scalars are rejected.
///
/// # Errors
///
/// Returns [`ContentError::InvalidContent`] when neither interpretation holds.
pub fn classify(content: &str) -> Result<ContentKind, ContentError> {
    let path = Utf8Path::new(content);
    if !content.is_empty() && path.metadata().is_ok() {
        return Ok(ContentKind::FilePath(path.to_path_buf()));
    }

    if serde_json::from_str::<Map<String, Value>>(content).is_ok() {
        return Ok(ContentKind::InlineText(content.to_owned()));
    }

    Err(ContentError::InvalidContent {
        preview: preview(content),
    })
}

/// Writes the classified content into a fresh temporary file.
///
/// The temporary file is allocated before any copying starts and is owned by
/// the returned guard, so it is removed on every path, including copy
/// failures.
///
/// # Errors
///
/// Returns [`ContentError::Io`] when the temporary file cannot be created or
/// written, or when the source file cannot be read.
pub fn materialize(kind: &ContentKind, name: &str) -> Result<ResolvedSource, ContentError> {
    tracing::debug!(name, "creating ignition temporary file");
    let temp = Builder::new()
        .prefix(&temp_prefix(name))
        .tempfile()
        .map_err(|err| ContentError::io("create temporary file in", std::env::temp_dir().display(), &err))?;
    let (mut file, temp_path) = temp.into_parts();
    let mut source = ResolvedSource {
        path: Some(temp_path),
        size_bytes: 0,
    };

    match kind {
        ContentKind::FilePath(path) => copy_file(path, &mut file)?,
        ContentKind::InlineText(text) => file
            .write_all(text.as_bytes())
            .map_err(|err| ContentError::io("write ignition object to", source.path().display(), &err))?,
    }
    file.flush()
        .map_err(|err| ContentError::io("flush", source.path().display(), &err))?;
    drop(file);

    source.size_bytes = volume_size(source.path())?;
    Ok(source)
}

/// Classifies and materialises `content` in one call.
///
/// # Errors
///
/// Propagates [`classify`] and [`materialize`] errors unchanged.
pub fn resolve(content: &str, name: &str) -> Result<ResolvedSource, ContentError> {
    let kind = classify(content)?;
    materialize(&kind, name)
}

/// Temporary local copy of the ignition payload.
///
/// The file is removed when the value is dropped. Removal failures are logged
/// rather than returned, since the provisioning result is already decided.
#[derive(Debug)]
pub struct ResolvedSource {
    path: Option<TempPath>,
    size_bytes: u64,
}

impl ResolvedSource {
    /// Location of the temporary file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Exact byte length of the payload.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Opens the payload for reading from the start.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised by the operating system.
    pub fn open(&self) -> io::Result<File> {
        File::open(self.path())
    }
}

impl Drop for ResolvedSource {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        let shown = path.display().to_string();
        match path.close() {
            Ok(()) => tracing::debug!(path = %shown, "removed ignition temporary file"),
            Err(err) => {
                tracing::warn!(path = %shown, error = %err, "failed to remove ignition temporary file");
            }
        }
    }
}

fn copy_file(path: &Utf8Path, target: &mut File) -> Result<(), ContentError> {
    let mut source = open_ambient(path).map_err(|err| ContentError::io("open ignition file", path, &err))?;
    io::copy(&mut source, target)
        .map_err(|err| ContentError::io("copy ignition file", path, &err))?;
    Ok(())
}

/// Opens a caller-supplied path with ambient authority, following symlinks
/// wherever they point.
fn open_ambient(path: &Utf8Path) -> io::Result<cap_std::fs_utf8::File> {
    cap_std::fs_utf8::File::open_ambient(path, ambient_authority())
}

fn temp_prefix(name: &str) -> String {
    let sanitised: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = sanitised.trim_matches(|ch| ch == '-' || ch == '.');
    if trimmed.is_empty() {
        return String::from(DEFAULT_TEMP_PREFIX);
    }
    trimmed.to_owned()
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
