//! Track-info registry.
//!
//! A process-wide mapping from track identifier to [`TrackDescriptor`],
//! consulted whenever a `deezer-enc://{track_id}` URL is opened. Entries
//! persist until explicitly unregistered; a missing entry is a fail-open
//! condition — the caller gets no loader attached, and downstream parsing
//! of the still-encrypted bytes will fail on its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use url::Url;

use crate::error::{Error, Result};
use crate::fetch::RangeFetcher;
use crate::range_loader::RangeLoader;
use crate::track::{RawSecret, TrackDescriptor, TrackId};

/// The custom URL scheme this registry intercepts.
pub const SCHEME: &str = "deezer-enc";

/// A mutex-protected `track_id -> descriptor` map.
///
/// `lookup` is safe to call from any thread; the registry holds no
/// ownership over callers, only over the descriptors they registered.
pub struct Registry {
    descriptors: Mutex<HashMap<TrackId, TrackDescriptor>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptors: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `descriptor`, returning the `deezer-enc://{track_id}`
    /// URL the decoder should be pointed at.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn register(&self, descriptor: TrackDescriptor) -> Result<Url> {
        let track_id = descriptor.track_id().to_owned();
        let mut descriptors = self.descriptors.lock()?;
        descriptors.insert(track_id.clone(), descriptor);
        Url::parse(&format!("{SCHEME}://{track_id}")).map_err(Error::from)
    }

    /// Looks up the descriptor for `track_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn lookup(&self, track_id: &str) -> Result<Option<TrackDescriptor>> {
        Ok(self.descriptors.lock()?.get(track_id).cloned())
    }

    /// Removes the entry for `track_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn unregister(&self, track_id: &str) -> Result<()> {
        self.descriptors.lock()?.remove(track_id);
        Ok(())
    }

    /// Looks up `url`'s track identifier and, if registered, attaches a
    /// [`RangeLoader`] for it. Returns `Ok(None)` on a missing entry —
    /// the fail-open case named by the scheme: no loader is attached and
    /// the decoder will see encrypted bytes and fail to parse.
    ///
    /// # Errors
    ///
    /// Returns an error if `url`'s scheme is not [`SCHEME`], or if the
    /// internal lock is poisoned.
    pub fn open(
        &self,
        url: &Url,
        secret: RawSecret,
        fetcher: Arc<dyn RangeFetcher>,
    ) -> Result<Option<RangeLoader>> {
        if url.scheme() != SCHEME {
            return Err(Error::invalid_argument(format!(
                "unsupported URL scheme {}",
                url.scheme()
            )));
        }

        let track_id = url.host_str().unwrap_or_default();
        let Some(descriptor) = self.lookup(track_id)? else {
            return Ok(None);
        };

        Ok(Some(RangeLoader::new(descriptor, secret, fetcher)))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::media::ContentType;

    fn descriptor(track_id: &str) -> TrackDescriptor {
        let url = Url::parse("https://cdn.example/track.mp3").unwrap();
        TrackDescriptor::new(track_id, url, 10_000, ContentType::Mpeg)
    }

    #[test]
    fn register_then_lookup_roundtrips() {
        let registry = Registry::new();
        let url = registry.register(descriptor("42")).unwrap();
        assert_eq!(url.as_str(), "deezer-enc://42");

        let found = registry.lookup("42").unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().track_id(), "42");
    }

    #[test]
    fn missing_entry_is_fail_open() {
        let registry = Registry::new();
        assert!(registry.lookup("missing").unwrap().is_none());
    }

    #[test]
    fn unregister_removes_entry() {
        let registry = Registry::new();
        registry.register(descriptor("42")).unwrap();
        registry.unregister("42").unwrap();
        assert!(registry.lookup("42").unwrap().is_none());
    }
}
