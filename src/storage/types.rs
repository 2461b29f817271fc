use crate::error::StationResult;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Chunked body of a blob, from disk, a peer or the origin.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

pub const DEFAULT_MANIFEST_CONTENT_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlobMetadata {
    pub digest: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// A manifest body together with what is needed to serve it.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestData {
    pub repository: String,
    pub reference: String,
    pub digest: String,
    pub content_type: String,
    pub content: Bytes,
}

impl ManifestData {
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Byte window of a blob read. `length: None` reads to the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Consumes `data` into the store. The content must hash to `digest`.
    async fn save_blob(&self, digest: &str, data: ByteStream) -> StationResult<BlobMetadata>;

    /// Fails with `NotFound` when the blob is absent.
    async fn get_blob(&self, digest: &str, range: Option<ByteRange>) -> StationResult<ByteStream>;

    async fn blob_exists(&self, digest: &str) -> StationResult<bool>;

    async fn blob_metadata(&self, digest: &str) -> StationResult<BlobMetadata>;

    async fn delete_blob(&self, digest: &str) -> StationResult<bool>;

    /// Bytes used by all stored blobs.
    async fn total_size(&self) -> StationResult<u64>;
}

#[async_trait]
pub trait ManifestStorage: Send + Sync {
    async fn save_manifest(&self, manifest: &ManifestData) -> StationResult<()>;

    async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> StationResult<Option<ManifestData>>;

    async fn manifest_exists(&self, repository: &str, reference: &str) -> StationResult<bool>;

    async fn delete_manifest(&self, repository: &str, reference: &str) -> StationResult<bool>;

    async fn manifest_count(&self) -> StationResult<u64>;
}
