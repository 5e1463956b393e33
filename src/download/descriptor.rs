//! Remote file descriptors and the requests built from them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::filename;

/// Identity of a remote file referenced from a conversation record.
///
/// Field aliases accept the content service's own JSON names so that
/// descriptors can be read straight out of a dumped conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    /// Service-assigned file id.
    pub id: String,
    /// Display name of the file.
    pub name: String,
    /// Private download URL.
    #[serde(alias = "url_private_download", alias = "url_private")]
    pub url: String,
    /// Declared size in bytes.
    #[serde(default)]
    pub size: u64,
}

impl Descriptor {
    /// Creates a new descriptor.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            size,
        }
    }

    /// Local filename for this file, `"{id}-{name}"`.
    #[must_use]
    pub fn filename(&self) -> String {
        filename::filename(self)
    }
}

/// A descriptor paired with the directory it should be saved into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Target directory.
    pub directory: PathBuf,
    /// The file to download.
    pub descriptor: Descriptor,
}

impl Request {
    /// Creates a new request.
    pub fn new(directory: impl Into<PathBuf>, descriptor: Descriptor) -> Self {
        Self {
            directory: directory.into(),
            descriptor,
        }
    }

    /// Deduplication identity: the same file into two directories is two downloads.
    #[must_use]
    pub fn identity(&self) -> (&str, &Path) {
        (&self.descriptor.id, &self.directory)
    }

    /// Full destination path of the downloaded file.
    #[must_use]
    pub fn destination(&self) -> PathBuf {
        self.directory.join(self.descriptor.filename())
    }
}
