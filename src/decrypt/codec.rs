//! Chunk codec: stream mode and range mode.
//!
//! Both modes buffer ciphertext until a full [`CHUNK_SIZE`] chunk is
//! available, decrypt it if the chunk's grid index is striped, and emit
//! cleartext. They differ only in where the grid starts and what they do
//! with the emitted bytes:
//!
//! * [`StreamCodec`] starts at grid index 0 and emits everything.
//! * [`RangeCodec`] starts at an arbitrary aligned grid index, drops a
//!   caller-specified prefix from the first emitted chunk, and truncates
//!   to a caller-specified total length.

use crate::decrypt::cipher::decrypt_chunk;
use crate::error::Result;
use crate::track::TrackKey;
use crate::util::{is_striped_index, CHUNK_SIZE};

/// What a codec does when [`decrypt_chunk`] fails on a striped chunk.
///
/// The scheme's documented default is passthrough: a single bad key byte
/// or cipher anomaly should still yield audible audio when the broken
/// chunks fall outside critical bitstream headers, rather than aborting
/// playback outright. [`CipherFailurePolicy::Abort`] is kept available for
/// callers that would rather fail loudly than risk corrupted audio.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum CipherFailurePolicy {
    /// Emit the chunk's ciphertext unmodified and continue.
    #[default]
    PassThrough,
    /// Propagate the cipher error, aborting the stream.
    Abort,
}

/// Attempts to decrypt `chunk` in place, applying `policy` on failure.
/// Operates on a copy so a partially-applied decryption on error never
/// corrupts `chunk` under the passthrough policy.
fn decrypt_or_recover(key: &TrackKey, chunk: &mut [u8], policy: CipherFailurePolicy) -> Result<()> {
    let mut attempt = chunk.to_vec();
    match decrypt_chunk(key, &mut attempt) {
        Ok(()) => {
            chunk.copy_from_slice(&attempt);
            Ok(())
        }
        Err(err) => match policy {
            CipherFailurePolicy::PassThrough => {
                log::warn!("cipher failure on chunk, passing through unmodified: {err}");
                Ok(())
            }
            CipherFailurePolicy::Abort => Err(err),
        },
    }
}

/// Stream-mode chunk codec state.
///
/// Used by the streaming input source (whole-file mode) and by the
/// download manager's post-download decryption pass.
pub struct StreamCodec {
    key: TrackKey,
    chunk_index: u64,
    buffer: Vec<u8>,
    policy: CipherFailurePolicy,
}

impl StreamCodec {
    /// Creates a codec starting at grid index 0, with the default
    /// [`CipherFailurePolicy::PassThrough`] policy.
    #[must_use]
    pub fn new(key: TrackKey) -> Self {
        Self::with_policy(key, CipherFailurePolicy::default())
    }

    /// Creates a codec starting at grid index 0 with an explicit cipher
    /// failure policy.
    #[must_use]
    pub fn with_policy(key: TrackKey, policy: CipherFailurePolicy) -> Self {
        Self {
            key,
            chunk_index: 0,
            buffer: Vec::with_capacity(CHUNK_SIZE as usize),
            policy,
        }
    }

    /// Feeds ciphertext bytes, returning any newly completed cleartext
    /// chunks. Bytes that do not yet form a full chunk are retained
    /// internally until [`Self::feed`] is called again or [`Self::flush`]
    /// is called.
    ///
    /// # Errors
    ///
    /// Under [`CipherFailurePolicy::Abort`], propagates a cipher failure
    /// from [`decrypt_chunk`] on a striped chunk. Under the default
    /// [`CipherFailurePolicy::PassThrough`], a cipher failure is logged
    /// and the chunk is emitted unmodified instead.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);

        let mut out = Vec::new();
        while self.buffer.len() as u64 >= CHUNK_SIZE {
            let mut chunk: Vec<u8> = self.buffer.drain(..CHUNK_SIZE as usize).collect();
            if is_striped_index(self.chunk_index) {
                decrypt_or_recover(&self.key, &mut chunk, self.policy)?;
            }
            out.extend_from_slice(&chunk);
            self.chunk_index += 1;
        }
        Ok(out)
    }

    /// Emits the remaining buffered bytes verbatim. The final, possibly
    /// short, chunk of a stream is never decrypted.
    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

/// Range-mode chunk codec state.
///
/// Starts at an arbitrary chunk-aligned grid offset (given as
/// `start_chunk_index`), drops `drop_bytes` from the front of the first
/// emitted cleartext chunk, and truncates total output to
/// `requested_length`. Drop-bytes is always applied before length
/// truncation, and always after decryption.
pub struct RangeCodec {
    key: TrackKey,
    chunk_index: u64,
    buffer: Vec<u8>,
    drop_bytes: u64,
    requested_length: u64,
    bytes_responded: u64,
    policy: CipherFailurePolicy,
}

impl RangeCodec {
    /// Creates a range-mode codec with the default
    /// [`CipherFailurePolicy::PassThrough`] policy.
    #[must_use]
    pub fn new(
        key: TrackKey,
        start_chunk_index: u64,
        drop_bytes: u64,
        requested_length: u64,
    ) -> Self {
        Self::with_policy(key, start_chunk_index, drop_bytes, requested_length, CipherFailurePolicy::default())
    }

    /// Creates a range-mode codec with an explicit cipher failure policy.
    #[must_use]
    pub fn with_policy(
        key: TrackKey,
        start_chunk_index: u64,
        drop_bytes: u64,
        requested_length: u64,
        policy: CipherFailurePolicy,
    ) -> Self {
        Self {
            key,
            chunk_index: start_chunk_index,
            buffer: Vec::with_capacity(CHUNK_SIZE as usize),
            drop_bytes,
            requested_length,
            bytes_responded: 0,
            policy,
        }
    }

    /// Returns `true` once `requested_length` bytes have been emitted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.bytes_responded >= self.requested_length
    }

    /// Feeds ciphertext bytes, returning any newly completed and
    /// length-truncated cleartext.
    ///
    /// # Errors
    ///
    /// See [`StreamCodec::feed`].
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);

        let mut out = Vec::new();
        while !self.is_complete() && self.buffer.len() as u64 >= CHUNK_SIZE {
            let mut chunk: Vec<u8> = self.buffer.drain(..CHUNK_SIZE as usize).collect();
            if is_striped_index(self.chunk_index) {
                decrypt_or_recover(&self.key, &mut chunk, self.policy)?;
            }
            self.chunk_index += 1;
            self.emit(&chunk, &mut out);
        }
        Ok(out)
    }

    /// Emits the remaining buffered bytes, still subject to drop-bytes
    /// and length truncation. The final, possibly short, chunk of a
    /// stream is never decrypted.
    pub fn flush(&mut self) -> Vec<u8> {
        let chunk = std::mem::take(&mut self.buffer);
        let mut out = Vec::new();
        if !self.is_complete() {
            self.emit(&chunk, &mut out);
        }
        out
    }

    fn emit(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        let mut slice = chunk;

        if self.drop_bytes > 0 {
            let drop = self.drop_bytes.min(slice.len() as u64) as usize;
            slice = &slice[drop..];
            self.drop_bytes -= drop as u64;
        }

        let remaining = self.requested_length - self.bytes_responded;
        let take = (slice.len() as u64).min(remaining) as usize;
        out.extend_from_slice(&slice[..take]);
        self.bytes_responded += take as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> [u8; 16] {
        *b"g4el58wc0zvf9na1"
    }

    fn encrypt_chunk(key: &TrackKey, chunk: &mut [u8]) {
        use blowfish::cipher::{BlockEncryptMut, KeyIvInit};
        use cbc::cipher::block_padding::NoPadding;
        const IV: &[u8; 8] = b"\x00\x01\x02\x03\x04\x05\x06\x07";
        let cipher = cbc::Encryptor::<blowfish::Blowfish>::new_from_slices(&**key, IV).unwrap();
        cipher.encrypt_padded_mut::<NoPadding>(chunk, chunk.len()).unwrap();
    }

    #[test]
    fn abort_policy_still_round_trips_valid_input() {
        // The cipher cannot actually fail on a well-formed 2048-byte chunk
        // with a valid 16-byte key (see `decrypt_chunk`'s own docs), so
        // this only exercises that the explicit `Abort` policy doesn't
        // change behavior on the happy path.
        let key = TrackKey::derive("3135556", &secret());
        let mut ciphertext = vec![0u8; 2048];
        encrypt_chunk(&key, &mut ciphertext);

        let mut codec = StreamCodec::with_policy(key, CipherFailurePolicy::Abort);
        let mut out = codec.feed(&ciphertext).unwrap();
        out.extend(codec.flush());

        assert_eq!(out, vec![0u8; 2048]);
    }

    #[test]
    fn single_chunk_decrypts_to_zeros() {
        let key = TrackKey::derive("3135556", &secret());
        let mut ciphertext = vec![0u8; 2048];
        encrypt_chunk(&key, &mut ciphertext);

        let mut codec = StreamCodec::new(key);
        let mut out = codec.feed(&ciphertext).unwrap();
        out.extend(codec.flush());

        assert_eq!(out, vec![0u8; 2048]);
    }

    #[test]
    fn three_chunk_grid_only_decrypts_striped_chunk() {
        let key = TrackKey::derive("3135556", &secret());

        let mut chunk0 = vec![0u8; 2048];
        encrypt_chunk(&key, &mut chunk0);
        let chunk1: Vec<u8> = (0..2048u32).map(|i| (i & 0xFF) as u8).collect();
        let chunk2: Vec<u8> = (0..2048u32).map(|i| (0xFFu32.wrapping_sub(i & 0xFF)) as u8).collect();

        let mut input = Vec::new();
        input.extend_from_slice(&chunk0);
        input.extend_from_slice(&chunk1);
        input.extend_from_slice(&chunk2);

        let mut codec = StreamCodec::new(key);
        let mut out = codec.feed(&input).unwrap();
        out.extend(codec.flush());

        assert_eq!(out.len(), 6144);
        assert_eq!(&out[0..2048], vec![0u8; 2048].as_slice());
        assert_eq!(&out[2048..4096], chunk1.as_slice());
        assert_eq!(&out[4096..6144], chunk2.as_slice());
    }

    #[test]
    fn trailing_short_chunk_is_never_decrypted() {
        let key = TrackKey::derive("3135556", &secret());

        let mut chunk0 = vec![0u8; 2048];
        encrypt_chunk(&key, &mut chunk0);
        let chunk1: Vec<u8> = (0..2048u32).map(|i| (i & 0xFF) as u8).collect();
        let chunk2 = vec![7u8; 904];

        let mut input = Vec::new();
        input.extend_from_slice(&chunk0);
        input.extend_from_slice(&chunk1);
        input.extend_from_slice(&chunk2);

        let mut codec = StreamCodec::new(key);
        let mut out = codec.feed(&input).unwrap();
        out.extend(codec.flush());

        assert_eq!(out.len(), 5000);
        assert_eq!(&out[4096..5000], chunk2.as_slice());
    }

    #[test]
    fn range_mode_drops_prefix_and_truncates_length() {
        // N = 10000, request offset=1000 length=3000.
        // aligned_start = 0, covers chunks 0-1 (0..4096), drop_bytes = 1000.
        let key = TrackKey::derive("3135556", &secret());

        let mut chunk0 = vec![0u8; 2048];
        encrypt_chunk(&key, &mut chunk0);
        let chunk1: Vec<u8> = (0..2048u32).map(|i| (i & 0xFF) as u8).collect();

        let mut full_stream_codec = StreamCodec::new(key.clone());
        let mut expected_full = full_stream_codec.feed(&chunk0).unwrap();
        expected_full.extend(full_stream_codec.feed(&chunk1).unwrap());
        expected_full.extend(full_stream_codec.flush());
        let expected = &expected_full[1000..4000];

        let mut range_input = Vec::new();
        range_input.extend_from_slice(&chunk0);
        range_input.extend_from_slice(&chunk1);

        let mut codec = RangeCodec::new(key, 0, 1000, 3000);
        let mut out = codec.feed(&range_input).unwrap();
        out.extend(codec.flush());

        assert_eq!(out.len(), 3000);
        assert_eq!(out.as_slice(), expected);
        assert!(codec.is_complete());
    }
}
