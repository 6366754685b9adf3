//! Configuration for the decryption and streaming pipeline.
//!
//! This module handles:
//! * Scratch and destination directories for streaming sources and the
//!   download manager
//! * The download manifest location and concurrency limit
//! * The fixed Blowfish secret used in track-key derivation
//!
//! # Examples
//!
//! ```rust
//! use deezer_enc::config::Config;
//!
//! let config = Config::new().expect("default config");
//! assert_eq!(config.max_concurrent_downloads, 2);
//! ```

use std::path::PathBuf;

use veil::Redact;

use crate::error::Result;
use crate::track::{RawSecret, SECRET_LENGTH};

/// Application configuration.
///
/// Covers only the ambient concerns of this crate: where scratch and
/// final files live, how many downloads may run concurrently, and the
/// fixed secret mixed into every track key. Session/device/transport
/// configuration belongs to the host application, not this crate.
#[derive(Clone, Redact)]
pub struct Config {
    /// Scratch directory for streaming sources' temp files.
    pub temp_dir: PathBuf,

    /// Final destination directory for completed downloads.
    pub downloads_dir: PathBuf,

    /// Final destination directory for downloaded artwork.
    pub artwork_dir: PathBuf,

    /// Path to the JSON download manifest.
    pub manifest_path: PathBuf,

    /// Maximum number of concurrent download transport tasks.
    pub max_concurrent_downloads: usize,

    /// Fixed secret XORed into every derived track key.
    #[redact]
    pub bf_secret: RawSecret,

    /// User agent sent on outbound range-fetch requests.
    pub user_agent: String,
}

/// The fixed secret Deezer mixes into every track key derivation.
///
/// This is not a credential in the usual sense — it is a constant
/// published by the scheme itself — but it is redacted in `Debug` output
/// for the same reason the teacher redacts session secrets: it should
/// not end up in logs or bug reports verbatim.
const DEFAULT_BF_SECRET: &str = "g4el58wc0zvf9na1";

impl Config {
    /// Creates a configuration from environment variables, falling back
    /// to platform-appropriate defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `DEEZER_ENC_BF_SECRET` is set but is not
    /// exactly `SECRET_LENGTH` bytes.
    pub fn new() -> Result<Self> {
        let temp_dir = std::env::var("DEEZER_ENC_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("deezer-enc"));

        let downloads_dir = std::env::var("DEEZER_ENC_DOWNLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| temp_dir.join("downloads").join("tracks"));

        let artwork_dir = std::env::var("DEEZER_ENC_ARTWORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| temp_dir.join("downloads").join("artwork"));

        let manifest_path = std::env::var("DEEZER_ENC_MANIFEST_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| temp_dir.join("downloads").join("manifest.json"));

        let max_concurrent_downloads = std::env::var("DEEZER_ENC_MAX_CONCURRENT_DOWNLOADS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        let bf_secret = match std::env::var("DEEZER_ENC_BF_SECRET") {
            Ok(secret) => Self::parse_secret(&secret)?,
            Err(_) => Self::parse_secret(DEFAULT_BF_SECRET)?,
        };

        let user_agent = std::env::var("DEEZER_ENC_USER_AGENT")
            .unwrap_or_else(|_| concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned());

        Ok(Self {
            temp_dir,
            downloads_dir,
            artwork_dir,
            manifest_path,
            max_concurrent_downloads,
            bf_secret,
            user_agent,
        })
    }

    fn parse_secret(s: &str) -> Result<RawSecret> {
        let bytes = s.as_bytes();
        if bytes.len() != SECRET_LENGTH {
            return Err(crate::error::Error::invalid_argument(format!(
                "bf_secret length is {} but should be {SECRET_LENGTH}",
                bytes.len(),
            )));
        }
        let mut secret = RawSecret::default();
        secret.copy_from_slice(bytes);
        Ok(secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_published_secret() {
        let config = Config::new().expect("default config");
        assert_eq!(&config.bf_secret, DEFAULT_BF_SECRET.as_bytes());
        assert_eq!(config.max_concurrent_downloads, 2);
    }

    #[test]
    fn rejects_wrong_length_secret() {
        assert!(Config::parse_secret("short").is_err());
    }
}
