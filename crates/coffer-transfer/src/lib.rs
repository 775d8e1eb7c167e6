//! coffer-transfer: the authenticated, end-to-end encrypted file protocol
//!
//! ```text
//! client                         server
//!   FileKey ─wrap(server pk)─▶   unwrap (validation only)
//!   ChaCha20(file) ─chunks──▶    ChunkReader ─▶ BlobStore
//!                                MetadataStore.add
//!   ◀─ id
//!
//!   ◀─ info{re-wrapped key}      unwrap(server sk) ─▶ wrap(caller pk)
//!   ◀─ ciphertext chunks         BlobStore ─▶ chunk_stream
//! ```

pub mod accounts;
pub mod bridge;
pub mod client;
pub mod protocol;
pub mod service;

pub use accounts::{Accounts, Issued};
pub use bridge::{chunk_stream, ChunkReader};
pub use client::{CofferClient, ProgressFn};
pub use protocol::Vault;
pub use service::{routes, AccountsService, VaultService};
