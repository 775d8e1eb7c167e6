//! coffer-crypto: client/server E2E encryption primitives
//!
//! Hybrid scheme:
//! ```text
//! FileKey (256-bit random, one per file, generated by the uploading client)
//!   ├── wrapped for the server:  RSA-OAEP(SHA-256) with the server public key
//!   ├── re-wrapped on download:  RSA-OAEP(SHA-256) with the caller's public key
//!   └── file bytes:              ChaCha20 keystream XOR, zero nonce
//! ```
//!
//! The stream cipher is length-preserving and carries no authentication tag.
//! Each FileKey encrypts exactly one file, so the fixed nonce never repeats
//! under a key.

pub mod error;
pub mod keys;
pub mod keystore;
pub mod stream;

pub use error::CryptoError;
pub use keys::{generate_file_key, parse_public_pem, unwrap_key, wrap_key, FileKey, KeyPair};
pub use keystore::{load_public_key, save_public_key, KeyStore};
pub use stream::FileCipher;

/// Size of a file key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the ChaCha20 (RFC 8439) nonce
pub const NONCE_SIZE: usize = 12;
