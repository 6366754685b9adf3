//! Track identity and key derivation.
//!
//! This module provides:
//! * [`TrackDescriptor`], the tuple of facts needed to open a stream for a
//!   track: its identifier, encrypted origin URL, declared length, and
//!   content-type hint.
//! * [`TrackKey`], the 16-byte Blowfish key derived from a track
//!   identifier and the fixed scheme secret.
//!
//! # Examples
//!
//! ```rust
//! use deezer_enc::track::TrackKey;
//!
//! let secret = *b"g4el58wc0zvf9na1";
//! let key = TrackKey::derive("3135556", &secret);
//! assert_eq!(key.as_bytes().len(), 16);
//! ```

use std::fmt;
use std::ops::Deref;

use md5::{Digest, Md5};
use url::Url;

use crate::protocol::media::{Cipher, ContentType};

/// Length in bytes of a derived track key.
pub const KEY_LENGTH: usize = 16;

/// Length in bytes of the fixed scheme secret mixed into every track key.
pub const SECRET_LENGTH: usize = 16;

/// Raw secret bytes, as configured.
pub type RawSecret = [u8; SECRET_LENGTH];

/// Raw key bytes.
pub type RawKey = [u8; KEY_LENGTH];

/// A track-specific Blowfish key, derived once per track identifier.
///
/// Derivation follows the scheme's published algorithm exactly: MD5 the
/// track identifier to a 32-character lowercase hex string, then XOR
/// corresponding ASCII hex-digit codepoints 16 apart against the fixed
/// secret. The XOR operates on the *hex characters*, not on the raw MD5
/// digest bytes — an easy detail to get wrong, and load-bearing for
/// interoperability with the origin's own decryption.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct TrackKey(RawKey);

impl TrackKey {
    /// Derives the key for `track_id` given the fixed scheme `secret`.
    #[must_use]
    pub fn derive(track_id: &str, secret: &RawSecret) -> Self {
        let digest = format!("{:x}", Md5::digest(track_id.as_bytes()));
        let hex = digest.as_bytes();
        debug_assert_eq!(hex.len(), 2 * KEY_LENGTH);

        let mut key = RawKey::default();
        for i in 0..KEY_LENGTH {
            key[i] = hex[i] ^ hex[i + KEY_LENGTH] ^ secret[i];
        }
        Self(key)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &RawKey {
        &self.0
    }
}

impl Deref for TrackKey {
    type Target = RawKey;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Identifies a track by its origin-assigned identifier.
pub type TrackId = String;

/// The tuple of facts needed to open a stream for a track.
///
/// Bound into the registry under its `track_id` (see [`crate::registry`])
/// when the host application learns about a playable or downloadable
/// track, and consulted whenever `deezer-enc://{track_id}` is opened.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrackDescriptor {
    track_id: TrackId,
    url: Url,
    content_length: u64,
    content_type: ContentType,
    cipher: Cipher,
}

impl TrackDescriptor {
    /// Creates a new descriptor.
    #[must_use]
    pub fn new(
        track_id: impl Into<TrackId>,
        url: Url,
        content_length: u64,
        content_type: ContentType,
    ) -> Self {
        Self {
            track_id: track_id.into(),
            url,
            content_length,
            content_type,
            cipher: Cipher::BfCbcStripe,
        }
    }

    /// The track identifier this descriptor was registered under.
    #[must_use]
    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    /// The encrypted origin URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The declared byte length, identical for cleartext and ciphertext.
    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// The content-type hint reported to the decoder.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// The cipher applied to the origin bytes.
    #[must_use]
    pub fn cipher(&self) -> Cipher {
        self.cipher
    }

    /// Derives the Blowfish key for this track given the scheme secret.
    #[must_use]
    pub fn key(&self, secret: &RawSecret) -> TrackKey {
        TrackKey::derive(&self.track_id, secret)
    }
}

impl fmt::Display for TrackDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track {}", self.track_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: RawSecret = *b"g4el58wc0zvf9na1";

    #[test]
    fn derives_known_key_for_track_3135556() {
        let digest = format!("{:x}", Md5::digest(b"3135556"));
        let hex = digest.as_bytes();
        let mut expected = RawKey::default();
        for i in 0..KEY_LENGTH {
            expected[i] = hex[i] ^ hex[i + KEY_LENGTH] ^ SECRET[i];
        }

        let key = TrackKey::derive("3135556", &SECRET);
        assert_eq!(key.as_bytes(), &expected);
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = TrackKey::derive("42", &SECRET);
        let b = TrackKey::derive("42", &SECRET);
        assert_eq!(a, b);
    }

    #[test]
    fn different_tracks_yield_different_keys() {
        let a = TrackKey::derive("42", &SECRET);
        let b = TrackKey::derive("43", &SECRET);
        assert_ne!(a, b);
    }

    #[test]
    fn descriptor_reports_given_fields() {
        let url = Url::parse("https://cdn.example/track.mp3").unwrap();
        let descriptor = TrackDescriptor::new("42", url.clone(), 10_000, ContentType::Mpeg);
        assert_eq!(descriptor.track_id(), "42");
        assert_eq!(descriptor.url(), &url);
        assert_eq!(descriptor.content_length(), 10_000);
        assert_eq!(descriptor.content_type(), ContentType::Mpeg);
        assert_eq!(descriptor.cipher(), Cipher::BfCbcStripe);
    }
}
