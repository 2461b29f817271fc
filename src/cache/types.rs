use crate::storage::ManifestData;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    Manifest,
    Blob,
}

/// Identity of a cached artifact.
///
/// Manifests are addressed by repository and reference; blobs by digest
/// alone, so the same layer pulled through two repositories is one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKey {
    Manifest {
        repository: String,
        reference: String,
    },
    Blob {
        digest: String,
    },
}

impl CacheKey {
    pub fn manifest(repository: &str, reference: &str) -> Self {
        CacheKey::Manifest {
            repository: repository.to_string(),
            reference: reference.to_string(),
        }
    }

    pub fn blob(digest: &str) -> Self {
        CacheKey::Blob {
            digest: digest.to_string(),
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        match self {
            CacheKey::Manifest { .. } => ArtifactKind::Manifest,
            CacheKey::Blob { .. } => ArtifactKind::Blob,
        }
    }

    /// Key in the shared store; also the ring routing key.
    pub fn store_key(&self) -> String {
        match self {
            CacheKey::Manifest {
                repository,
                reference,
            } => format!("cache:manifest:{}:{}", repository, reference),
            CacheKey::Blob { digest } => format!("cache:blob:{}", digest),
        }
    }

    /// Name of the cluster lock guarding the origin fetch for this key.
    pub fn lock_name(&self) -> String {
        match self {
            CacheKey::Manifest {
                repository,
                reference,
            } => format!("manifest:{}:{}", repository, reference),
            CacheKey::Blob { digest } => format!("blob:{}", digest),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.store_key())
    }
}

/// Immutable cached record.
///
/// Manifest entries carry their body in `payload`. Blob entries record
/// presence, size and producer only; blob bytes live in durable storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub digest: String,
    pub size: u64,
    /// Node that produced the entry. Stamped on write when unset.
    pub owner_node_id: Option<String>,
    pub content_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: Option<Bytes>,
}

impl CacheEntry {
    pub fn for_manifest(manifest: &ManifestData) -> Self {
        Self {
            digest: manifest.digest.clone(),
            size: manifest.size(),
            owner_node_id: None,
            content_type: Some(manifest.content_type.clone()),
            timestamp: Utc::now(),
            payload: Some(manifest.content.clone()),
        }
    }

    pub fn for_blob(digest: &str, size: u64) -> Self {
        Self {
            digest: digest.to_string(),
            size,
            owner_node_id: None,
            content_type: None,
            timestamp: Utc::now(),
            payload: None,
        }
    }

    pub fn with_owner(mut self, node_id: &str) -> Self {
        self.owner_node_id = Some(node_id.to_string());
        self
    }

    /// Rebuilds the manifest this entry was made from, if it holds a body.
    pub fn to_manifest(&self, repository: &str, reference: &str) -> Option<ManifestData> {
        let content = self.payload.clone()?;
        Some(ManifestData {
            repository: repository.to_string(),
            reference: reference.to_string(),
            digest: self.digest.clone(),
            content_type: self
                .content_type
                .clone()
                .unwrap_or_else(|| crate::storage::types::DEFAULT_MANIFEST_CONTENT_TYPE.to_string()),
            content,
        })
    }

    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, |p| p.len())
    }
}
