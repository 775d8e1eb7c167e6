pub mod config;
pub mod error;
pub mod types;

pub use error::{VaultError, VaultResult};

/// Generated gRPC types and service traits (from coffer.proto)
pub mod proto {
    tonic::include_proto!("coffer");
}

/// Size of every ciphertext chunk on the wire, except possibly the last.
pub const CHUNK_SIZE: usize = 100 * 1024;

/// Metadata key carrying the session token, in both directions.
pub const AUTHORIZATION: &str = "authorization";
