//! Blowfish-CBC chunk decryption: the single-chunk cipher primitive and
//! the stream/range codec state machines built on top of it.

pub mod cipher;
pub mod codec;

pub use cipher::decrypt_chunk;
pub use codec::{CipherFailurePolicy, RangeCodec, StreamCodec};
