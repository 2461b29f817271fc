//! Origin Tier
//!
//! The upstream registry a cache miss finally falls through to. Only the
//! resolution pipeline talks to it, and only while holding the cluster lock
//! for the artifact.

pub mod registry;


pub use registry::RegistryOriginClient;

use crate::error::StationResult;
use crate::storage::types::ByteStream;

use async_trait::async_trait;
use bytes::Bytes;

/// Media types accepted when pulling manifests upstream.
pub const MANIFEST_ACCEPT_TYPES: [&str; 3] = [
    "application/vnd.docker.distribution.manifest.v2+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.oci.image.index.v1+json",
];

#[derive(Debug, Clone, PartialEq)]
pub struct OriginManifest {
    pub digest: String,
    pub content_type: String,
    pub content: Bytes,
}

#[async_trait]
pub trait OriginClient: Send + Sync {
    /// `NotFound` when the registry answers 404; `OriginFailure` once retries run out.
    async fn fetch_manifest(&self, repository: &str, reference: &str)
    -> StationResult<OriginManifest>;

    async fn manifest_exists(&self, repository: &str, reference: &str) -> StationResult<bool>;

    /// Body stream of a blob, after following any redirect to a CDN.
    async fn stream_blob(&self, repository: &str, digest: &str) -> StationResult<ByteStream>;

    async fn blob_exists(&self, repository: &str, digest: &str) -> StationResult<bool>;
}
