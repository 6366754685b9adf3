//! Cipher and content-type identifiers for a track's encrypted origin.
//!
//! These mirror the small slice of the gateway's media descriptor that a
//! track descriptor needs to know to open a stream: how the bytes are
//! obfuscated, and what content type hint to report to the decoder.
//!
//! # Examples
//!
//! ```rust
//! use deezer_enc::protocol::media::{Cipher, ContentType};
//!
//! assert_eq!(Cipher::BfCbcStripe.to_string(), "BF_CBC_STRIPE");
//! assert_eq!(ContentType::Flac.to_string(), "audio/flac");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Cipher applied to a track's encrypted origin bytes.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Debug, Hash)]
pub enum Cipher {
    /// Blowfish CBC with striping (every third full 2048-byte chunk).
    #[default]
    BfCbcStripe,
    /// No encryption; bytes are cleartext as delivered.
    None,
}

impl fmt::Display for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BfCbcStripe => write!(f, "BF_CBC_STRIPE"),
            Self::None => write!(f, "NONE"),
        }
    }
}

/// Content-type hint reported to the decoder for a track's origin stream.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Debug, Hash)]
pub enum ContentType {
    /// FLAC lossless payload.
    Flac,
    /// MP3/MPEG payload.
    #[default]
    Mpeg,
    /// Any other payload; reported with a generic audio UTI.
    Other,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flac => write!(f, "audio/flac"),
            Self::Mpeg => write!(f, "audio/mpeg"),
            Self::Other => write!(f, "application/octet-stream"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_display_matches_protocol_strings() {
        assert_eq!(Cipher::BfCbcStripe.to_string(), "BF_CBC_STRIPE");
        assert_eq!(Cipher::None.to_string(), "NONE");
    }

    #[test]
    fn content_type_display_matches_mime_types() {
        assert_eq!(ContentType::Flac.to_string(), "audio/flac");
        assert_eq!(ContentType::Mpeg.to_string(), "audio/mpeg");
        assert_eq!(ContentType::Other.to_string(), "application/octet-stream");
    }
}
