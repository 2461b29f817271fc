//! Durable Storage Module
//!
//! Local, disk-backed copy of every artifact this node has served. It sits
//! between the shared cache tier and the peers in the resolution order and
//! survives restarts.
//!
//! ## Components
//! - **`types`**: `BlobStorage` / `ManifestStorage` traits and their records.
//! - **`filesystem`**: the on-disk implementation (atomic writes, digest
//!   verification, chunked and ranged reads).
//! - **`eviction`**: periodic sweep keeping usage under a threshold.

pub mod eviction;
pub mod filesystem;
pub mod types;


pub use filesystem::FilesystemStorage;
pub use types::{
    BlobMetadata, BlobStorage, ByteRange, ByteStream, ManifestData, ManifestStorage,
};

use sha2::{Digest, Sha256};

/// `sha256:<hex>` digest of `content`.
pub fn compute_digest(content: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content)))
}
