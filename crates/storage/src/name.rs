//! Filename validation and collision candidates.
//!
//! Requested names come straight off the wire, so they are treated as
//! hostile until [`validate`] says otherwise. Only a single plain path
//! component is accepted; the storage directory is flat.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path};

/// Longest name (in bytes) most filesystems will accept for one component.
const MAX_NAME_LEN: usize = 255;

/// Validates an untrusted, client-supplied filename.
///
/// Rejects empty names, `.` and `..`, anything with a path separator or a
/// NUL byte, names longer than 255 bytes, and names starting with `.` (hidden
/// files are reserved for staging and transcoder scratch output).
///
/// # Examples
///
/// ```
/// use reel_storage::validate_name;
/// assert!(validate_name("clip.mp4").is_ok());
/// assert!(validate_name("holiday (final).mov").is_ok());
/// assert!(validate_name("../etc/passwd").is_err());
/// assert!(validate_name(".hidden.mp4").is_err());
/// assert!(validate_name("").is_err());
/// ```
pub fn validate(name: &str) -> Result<&str> {
    let invalid = || exn::Exn::from(ErrorKind::InvalidName(name.to_string()));
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.starts_with('.') {
        return Err(invalid());
    }
    // Backslashes aren't separators on Unix, but a Windows client meant them as one.
    if name.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(invalid()),
    }
}

/// Splits a name into base and extension at the last dot.
///
/// The extension keeps its dot. No dot (or only a leading one) means the
/// whole name is the base and the extension is empty.
pub(crate) fn split(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    }
}

/// Candidate names for `name`, in probing order: the name itself, then
/// `base(1)ext`, `base(2)ext`, and so on.
pub(crate) fn candidates(name: &str) -> impl Iterator<Item = String> + '_ {
    let (base, ext) = split(name);
    std::iter::once(name.to_string()).chain((1u64..).map(move |k| format!("{base}({k}){ext}")))
}
