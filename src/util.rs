//! Chunk-grid alignment helpers.
//!
//! This module provides the arithmetic shared by the chunk codec and the
//! range loader for reasoning about the fixed 2048-byte obfuscation grid:
//! * Rounding arbitrary offsets down/up to grid boundaries
//! * Converting a byte offset to its grid index
//!
//! # Example
//!
//! ```rust
//! use deezer_enc::util::{ceil_to_chunk, chunk_index_of, floor_to_chunk, CHUNK_SIZE};
//!
//! assert_eq!(floor_to_chunk(3000), 2048);
//! assert_eq!(ceil_to_chunk(3000), 4096);
//! assert_eq!(chunk_index_of(4096), 2);
//! assert_eq!(CHUNK_SIZE, 2048);
//! ```

/// Size in bytes of a single chunk in the obfuscation grid.
pub const CHUNK_SIZE: u64 = 2048;

/// Every `STRIPE`-th full chunk is encrypted.
pub const STRIPE: u64 = 3;

/// Rounds `offset` down to the start of its containing chunk.
#[inline]
#[must_use]
pub fn floor_to_chunk(offset: u64) -> u64 {
    (offset / CHUNK_SIZE) * CHUNK_SIZE
}

/// Rounds `offset` up to the start of the next chunk boundary.
///
/// If `offset` already sits on a boundary it is returned unchanged.
#[inline]
#[must_use]
pub fn ceil_to_chunk(offset: u64) -> u64 {
    floor_to_chunk(offset) + if offset % CHUNK_SIZE == 0 { 0 } else { CHUNK_SIZE }
}

/// Returns the zero-based grid index of the chunk containing `offset`.
#[inline]
#[must_use]
pub fn chunk_index_of(offset: u64) -> u64 {
    offset / CHUNK_SIZE
}

/// Returns `true` if the chunk at `index` is encrypted, assuming it is a
/// full `CHUNK_SIZE` chunk. The final, possibly short, chunk of a stream
/// is never encrypted regardless of its index — callers must check chunk
/// length separately.
#[inline]
#[must_use]
pub fn is_striped_index(index: u64) -> bool {
    index % STRIPE == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_rounds_down_to_grid() {
        assert_eq!(floor_to_chunk(0), 0);
        assert_eq!(floor_to_chunk(2047), 0);
        assert_eq!(floor_to_chunk(2048), 2048);
        assert_eq!(floor_to_chunk(3000), 2048);
    }

    #[test]
    fn ceil_rounds_up_to_grid() {
        assert_eq!(ceil_to_chunk(0), 0);
        assert_eq!(ceil_to_chunk(1), 2048);
        assert_eq!(ceil_to_chunk(2048), 2048);
        assert_eq!(ceil_to_chunk(2049), 4096);
    }

    #[test]
    fn chunk_index_matches_offset() {
        assert_eq!(chunk_index_of(0), 0);
        assert_eq!(chunk_index_of(2047), 0);
        assert_eq!(chunk_index_of(2048), 1);
        assert_eq!(chunk_index_of(6144), 3);
    }

    #[test]
    fn stripe_predicate_follows_every_third_chunk() {
        assert!(is_striped_index(0));
        assert!(!is_striped_index(1));
        assert!(!is_striped_index(2));
        assert!(is_striped_index(3));
        assert!(is_striped_index(6));
    }
}
