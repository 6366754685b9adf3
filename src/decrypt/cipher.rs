//! Single-chunk Blowfish-CBC decryption primitive.
//!
//! Standard Blowfish (16-round Feistel, 64-bit block) in CBC mode with a
//! fixed IV, operating on exact 2048-byte chunks (256 blocks of 8 bytes).
//! A chunk that is not exactly [`CHUNK_SIZE`] bytes is a no-op passthrough
//! regardless of its grid index — the caller is responsible for applying
//! the striping predicate before calling [`decrypt_chunk`].

use blowfish::{cipher::BlockDecryptMut, cipher::KeyIvInit, Blowfish};
use cbc::cipher::block_padding::NoPadding;

use crate::error::{Error, Result};
use crate::track::TrackKey;
use crate::util::CHUNK_SIZE;

/// Fixed IV used for every chunk's CBC decryption.
const CBC_IV: &[u8; 8] = b"\x00\x01\x02\x03\x04\x05\x06\x07";

/// Decrypts a single chunk in place.
///
/// If `chunk` is not exactly [`CHUNK_SIZE`] bytes long, it is left
/// untouched: the final, possibly short, chunk of a stream is never
/// encrypted, and this function does not itself decide which chunks are
/// striped — see [`crate::util::is_striped_index`].
///
/// # Errors
///
/// Returns `Error::Internal` if the cipher cannot be constructed from the
/// key and IV (never happens for a valid 16-byte [`TrackKey`]), or
/// `Error::DataLoss` if the ciphertext fails to decrypt under padding
/// constraints. Callers implementing the scheme's documented fallback
/// policy should catch this and pass the chunk through unmodified rather
/// than treat it as fatal.
pub fn decrypt_chunk(key: &TrackKey, chunk: &mut [u8]) -> Result<()> {
    if chunk.len() as u64 != CHUNK_SIZE {
        return Ok(());
    }

    let cipher = cbc::Decryptor::<Blowfish>::new_from_slices(&**key, CBC_IV)
        .map_err(|e| Error::internal(e.to_string()))?;

    cipher
        .decrypt_padded_mut::<NoPadding>(chunk)
        .map_err(|e| Error::data_loss(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use blowfish::cipher::{BlockEncryptMut, KeyIvInit as _};

    fn encrypt_chunk(key: &TrackKey, chunk: &mut [u8]) {
        let cipher = cbc::Encryptor::<Blowfish>::new_from_slices(&**key, CBC_IV).unwrap();
        cipher.encrypt_padded_mut::<NoPadding>(chunk, chunk.len()).unwrap();
    }

    #[test]
    fn round_trips_a_full_chunk() {
        let secret = *b"g4el58wc0zvf9na1";
        let key = TrackKey::derive("3135556", &secret);

        let plaintext: Vec<u8> = (0..2048u32).map(|i| (i & 0xFF) as u8).collect();
        let mut buf = plaintext.clone();

        encrypt_chunk(&key, &mut buf);
        assert_ne!(buf, plaintext);

        decrypt_chunk(&key, &mut buf).unwrap();
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn short_chunk_is_passthrough() {
        let secret = *b"g4el58wc0zvf9na1";
        let key = TrackKey::derive("3135556", &secret);

        let mut buf = vec![7u8; 904];
        let original = buf.clone();
        decrypt_chunk(&key, &mut buf).unwrap();
        assert_eq!(buf, original);
    }
}
