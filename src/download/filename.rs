//! Destination filenames for downloaded files.
//!
//! Files are stored as `"{id}-{name}"`: the id keeps same-named attachments
//! apart, the name keeps the result readable.

use super::Descriptor;

/// Builds the local filename for a descriptor.
#[must_use]
pub fn filename(descriptor: &Descriptor) -> String {
    format!(
        "{}-{}",
        sanitize_component(&descriptor.id),
        sanitize_component(&descriptor.name)
    )
}

/// Replaces characters that would let a component escape its directory.
///
/// Only path separators, NUL and control characters are touched; everything
/// else (spaces, unicode, dots inside the name) is kept as the service sent it.
pub(crate) fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
