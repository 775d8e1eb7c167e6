//! Length-preserving ChaCha20 stream encryption of file contents
//!
//! The keystream position advances by one byte per byte processed, so the
//! output depends only on the byte offset within the file, never on how the
//! file was split into chunks. Both sides must feed the same bytes in the
//! same order.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;

use crate::error::CryptoError;
use crate::keys::FileKey;
use crate::NONCE_SIZE;

/// Stateful encryptor/decryptor for one file. XOR is its own inverse, so the
/// same type serves both directions.
pub struct FileCipher {
    inner: ChaCha20,
    processed: u64,
}

impl FileCipher {
    pub fn new(key: &FileKey) -> Self {
        let nonce = [0u8; NONCE_SIZE];
        Self {
            inner: ChaCha20::new(key.as_bytes().into(), &nonce.into()),
            processed: 0,
        }
    }

    /// XOR the next `buf.len()` keystream bytes into `buf`.
    pub fn apply_in_place(&mut self, buf: &mut [u8]) -> Result<(), CryptoError> {
        self.inner
            .try_apply_keystream(buf)
            .map_err(|_| CryptoError::KeystreamExhausted(self.processed))?;
        self.processed += buf.len() as u64;
        Ok(())
    }

    pub fn encrypt_chunk(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut out = plaintext.to_vec();
        self.apply_in_place(&mut out)?;
        Ok(out)
    }

    pub fn decrypt_chunk(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.encrypt_chunk(ciphertext)
    }

    /// Bytes processed so far.
    pub fn position(&self) -> u64 {
        self.processed
    }
}

impl std::fmt::Debug for FileCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCipher")
            .field("processed", &self.processed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_file_key;
    use proptest::prelude::*;

    fn encrypt_in_chunks(key: &FileKey, data: &[u8], sizes: &[usize]) -> Vec<u8> {
        let mut cipher = FileCipher::new(key);
        let mut out = Vec::with_capacity(data.len());
        let mut rest = data;
        let mut i = 0;
        while !rest.is_empty() {
            let n = sizes[i % sizes.len()].clamp(1, rest.len());
            let (head, tail) = rest.split_at(n);
            out.extend(cipher.encrypt_chunk(head).unwrap());
            rest = tail;
            i += 1;
        }
        out
    }

    #[test]
    fn test_roundtrip() {
        let key = generate_file_key().unwrap();
        let plaintext = b"the quick brown fox jumps over the lazy dog".to_vec();

        let ciphertext = FileCipher::new(&key).encrypt_chunk(&plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);

        let decrypted = FileCipher::new(&key).decrypt_chunk(&ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_length_preserved() {
        let key = generate_file_key().unwrap();
        let mut cipher = FileCipher::new(&key);
        assert!(cipher.encrypt_chunk(&[]).unwrap().is_empty());
        assert_eq!(cipher.encrypt_chunk(&[0u8; 1001]).unwrap().len(), 1001);
        assert_eq!(cipher.position(), 1001);
    }

    #[test]
    fn test_different_keys_differ() {
        let data = vec![0u8; 256];
        let a = FileCipher::new(&generate_file_key().unwrap()).encrypt_chunk(&data).unwrap();
        let b = FileCipher::new(&generate_file_key().unwrap()).encrypt_chunk(&data).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_yields_garbage_not_error() {
        let data = b"secret payload".to_vec();
        let ct = FileCipher::new(&generate_file_key().unwrap()).encrypt_chunk(&data).unwrap();
        let pt = FileCipher::new(&generate_file_key().unwrap()).decrypt_chunk(&ct).unwrap();
        assert_eq!(pt.len(), data.len());
        assert_ne!(pt, data);
    }

    #[test]
    fn test_decrypt_with_different_chunking() {
        let key = generate_file_key().unwrap();
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

        let ciphertext = encrypt_in_chunks(&key, &data, &[102_400]);

        let mut cipher = FileCipher::new(&key);
        let mut plaintext = Vec::new();
        for chunk in ciphertext.chunks(1001) {
            plaintext.extend(cipher.decrypt_chunk(chunk).unwrap());
        }
        assert_eq!(plaintext, data);
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_ciphertext(
            data in proptest::collection::vec(any::<u8>(), 0..4096),
            sizes in proptest::collection::vec(1usize..700, 1..8),
        ) {
            let key = FileKey::from_bytes([9u8; 32]);
            let whole = FileCipher::new(&key).encrypt_chunk(&data).unwrap();
            let split = encrypt_in_chunks(&key, &data, &sizes);
            prop_assert_eq!(whole, split);
        }
    }
}
