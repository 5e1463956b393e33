//! Deduplication of download requests within one batch.
//!
//! The same attachment is often referenced from many messages. A request is
//! forwarded the first time its `(file id, directory)` identity is seen and
//! dropped afterwards; the set lives only as long as the stream it filters.

use std::collections::HashSet;
use std::future;
use std::path::PathBuf;

use futures_util::{Stream, StreamExt};
use tracing::debug;

use super::Request;

/// Remembers which request identities have already been forwarded.
#[derive(Debug, Default)]
pub struct SeenFilter {
    seen: HashSet<(String, PathBuf)>,
}

impl SeenFilter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time an identity is offered, false on repeats.
    pub fn admit(&mut self, request: &Request) -> bool {
        let (id, directory) = request.identity();
        if self.seen.contains(&(id.to_owned(), directory.to_path_buf())) {
            debug!(
                file = %request.descriptor.filename(),
                dir = %directory.display(),
                "already seen, skipping"
            );
            return false;
        }
        self.seen.insert((id.to_owned(), directory.to_path_buf()));
        true
    }

    /// Number of distinct identities seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns true if nothing has been admitted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Passes `requests` through, dropping repeats of an identity.
///
/// Order among forwarded requests is preserved.
pub fn filter_seen<S>(requests: S) -> impl Stream<Item = Request>
where
    S: Stream<Item = Request>,
{
    let mut seen = SeenFilter::new();
    requests.filter(move |request| future::ready(seen.admit(request)))
}
