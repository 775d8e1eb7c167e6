//! coffer-storage: where ciphertext and file records live
//!
//! - `blob`: encrypted file bodies in any OpenDAL backend (S3, fs, memory)
//! - `traits`: the metadata and identity database interfaces
//! - `sqlite` / `memory`: the two database implementations

pub mod blob;
pub mod error;
pub mod health;
pub mod memory;
pub mod migration;
pub mod operator;
pub mod sqlite;
pub mod traits;

pub use blob::{BlobReader, BlobStore, OpendalBlobStore};
pub use error::{Result, StorageError};
pub use health::check_health;
pub use memory::MemoryStore;
pub use operator::{build_from_core_config, build_operator, S3Credentials};
pub use sqlite::SqliteStore;
pub use traits::{MetadataStore, UserStore};
