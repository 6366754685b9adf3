//! Streaming input source for Deezer's chunk-obfuscated CDN content.
//!
//! This library implements a standalone input source for Deezer's
//! chunk-obfuscated streaming scheme, independent of any particular
//! player or host application. It provides:
//!
//! # Core Features
//!
//! * **Track Keys**: Per-track Blowfish key derivation from a track
//!   identifier and a fixed published secret
//! * **Chunk Codec**: Stream-mode and range-mode decryption of the
//!   2048-byte, every-third-chunk cipher grid
//! * **Streaming Input Source**: A push-pull input source where an async
//!   producer fetches ciphertext while a synchronous, blocking reader
//!   consumes cleartext, with seek and cancellation support
//! * **Range Resource Loading**: Chunk-aligned prefetch planning for
//!   partial-range reads against the same cipher grid
//! * **Download Manager**: A persistent, slot-limited background queue
//!   that downloads, decrypts, and (for non-Deezer origins) remuxes
//!   whole tracks
//!
//! # Architecture
//!
//! The library is organized into several key modules:
//!
//! * **Core Cryptography**
//!   - [`track`]: Per-track key derivation and track descriptors
//!   - [`decrypt`]: Blowfish-CBC chunk cipher and stream/range codecs
//!
//! * **Transport**
//!   - [`fetch`]: Abstract range-capable HTTP origin
//!   - [`source`]: Push-pull streaming input source
//!   - [`range_loader`]: Chunk-aligned partial-range prefetch planning
//!
//! * **Process-Wide State**
//!   - [`registry`]: Track descriptor lookup shared across input sources
//!   - [`download`]: Persistent background download manager
//!   - [`events`]: Download progress/completion/error events
//!
//! * **Configuration and Protocol**
//!   - [`config`]: Application settings
//!   - [`protocol`]: Cipher and content-type identifiers
//!
//! * **System Integration**
//!   - [`mod@error`]: Error types and handling
//!   - [`util`]: Chunk-grid arithmetic helpers
//!
//! # Example
//!
//! ```rust,no_run
//! use deezer_enc::config::Config;
//! use deezer_enc::fetch::HttpFetcher;
//! use deezer_enc::source::StreamingSource;
//! use deezer_enc::track::TrackDescriptor;
//! use std::sync::Arc;
//!
//! async fn example() -> deezer_enc::error::Result<()> {
//!     let config = Config::new()?;
//!     let fetcher = Arc::new(HttpFetcher::new(&config.user_agent)?);
//!     let descriptor = TrackDescriptor::new(
//!         "3135556",
//!         "https://cdn.example/track".parse()?,
//!         0,
//!         deezer_enc::protocol::media::ContentType::Mpeg,
//!     );
//!     let runtime = tokio::runtime::Handle::current();
//!     let _source = StreamingSource::new(descriptor, config.bf_secret, fetcher, runtime);
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Errors are handled through the types in the [`mod@error`] module, with
//! most functions returning [`Result`](error::Result).
//!
//! # Concurrency
//!
//! The download manager and the producer half of [`source::StreamingSource`]
//! use async/await and are designed to run on the Tokio runtime. The
//! consumer half of [`source::StreamingSource`] is deliberately
//! synchronous and blocking, so it can be called from a non-async decoder
//! thread.

#![deny(clippy::all)]
#![doc(test(attr(ignore)))]
#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(rust_2024_compatibility)]
#![warn(future_incompatible)]

#[macro_use]
extern crate log;

pub mod config;
pub mod decrypt;
pub mod download;
pub mod error;
pub mod events;
pub mod fetch;
pub mod protocol;
pub mod range_loader;
pub mod registry;
pub mod source;
pub mod track;
pub mod util;
