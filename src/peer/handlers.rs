use super::protocol::{
    BlobRangeQuery, ExistsResponse, HEADER_CONTENT_DIGEST, HealthResponse, ManifestQuery,
    PeerInfo,
};
use crate::cache::{CacheKey, TierCache};
use crate::error::StationResult;
use crate::membership::service::MembershipService;
use crate::storage::types::{BlobStorage, ByteRange, ManifestData, ManifestStorage};

use axum::{
    Json,
    body::Body,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// What a node needs to answer its peers: its own fast tiers and its disk.
pub struct PeerServiceState {
    pub membership: Arc<MembershipService>,
    pub cache: Arc<TierCache>,
    pub blobs: Arc<dyn BlobStorage>,
    pub manifests: Arc<dyn ManifestStorage>,
    pub capacity_bytes: u64,
}

impl PeerServiceState {
    /// Local copy of a manifest, from the tier cache or disk.
    pub async fn local_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> StationResult<Option<ManifestData>> {
        let key = CacheKey::manifest(repository, reference);
        match self.cache.get(&key).await {
            Ok(Some(entry)) => {
                if let Some(manifest) = entry.to_manifest(repository, reference) {
                    return Ok(Some(manifest));
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Tier cache lookup failed for {}: {}", key, e),
        }
        self.manifests.get_manifest(repository, reference).await
    }
}

pub async fn handle_manifest_exists(
    Extension(state): Extension<Arc<PeerServiceState>>,
    Query(query): Query<ManifestQuery>,
) -> (StatusCode, Json<ExistsResponse>) {
    match state.local_manifest(&query.repository, &query.reference).await {
        Ok(found) => (
            StatusCode::OK,
            Json(ExistsResponse {
                exists: found.is_some(),
                size: found.map(|m| m.size()),
            }),
        ),
        Err(e) => {
            tracing::error!(
                "Manifest lookup for {}:{} failed: {}",
                query.repository,
                query.reference,
                e
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ExistsResponse {
                    exists: false,
                    size: None,
                }),
            )
        }
    }
}

pub async fn handle_get_manifest(
    Extension(state): Extension<Arc<PeerServiceState>>,
    Query(query): Query<ManifestQuery>,
) -> Response {
    match state.local_manifest(&query.repository, &query.reference).await {
        Ok(Some(manifest)) => (
            StatusCode::OK,
            [
                (HEADER_CONTENT_DIGEST, manifest.digest.clone()),
                ("content-type", manifest.content_type.clone()),
            ],
            manifest.content,
        )
            .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("Serving manifest to peer failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn handle_blob_exists(
    Extension(state): Extension<Arc<PeerServiceState>>,
    Path(digest): Path<String>,
) -> (StatusCode, Json<ExistsResponse>) {
    match state.blobs.blob_metadata(&digest).await {
        Ok(meta) => (
            StatusCode::OK,
            Json(ExistsResponse {
                exists: true,
                size: Some(meta.size),
            }),
        ),
        Err(e) => {
            if !e.is_not_found() {
                tracing::warn!("Blob {} unavailable for peers: {}", digest, e);
            }
            (
                StatusCode::OK,
                Json(ExistsResponse {
                    exists: false,
                    size: None,
                }),
            )
        }
    }
}

pub async fn handle_get_blob(
    Extension(state): Extension<Arc<PeerServiceState>>,
    Path(digest): Path<String>,
    Query(range): Query<BlobRangeQuery>,
) -> Response {
    let range = ByteRange {
        offset: range.offset.unwrap_or(0),
        length: range.length,
    };

    match state.blobs.get_blob(&digest, Some(range)).await {
        Ok(stream) => (
            StatusCode::OK,
            [
                (HEADER_CONTENT_DIGEST, digest),
                (
                    "content-type",
                    "application/octet-stream".to_string(),
                ),
            ],
            Body::from_stream(stream),
        )
            .into_response(),
        Err(e) if e.is_not_found() => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("Streaming blob {} to peer failed: {}", digest, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn handle_health(
    Extension(state): Extension<Arc<PeerServiceState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let draining = state.membership.is_draining();
    let (code, status) = if draining {
        (StatusCode::SERVICE_UNAVAILABLE, "DOWN")
    } else {
        (StatusCode::OK, "UP")
    };
    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            node_id: state.membership.local_id().to_string(),
        }),
    )
}

pub async fn handle_info(Extension(state): Extension<Arc<PeerServiceState>>) -> Json<PeerInfo> {
    let usage_bytes = match state.blobs.total_size().await {
        Ok(size) => size,
        Err(e) => {
            tracing::warn!("Could not compute storage usage: {}", e);
            0
        }
    };
    let local = state.membership.local_identity();

    Json(PeerInfo {
        node_id: local.id().to_string(),
        peer_endpoint: local.peer_endpoint().to_string(),
        control_endpoint: local.control_endpoint().to_string(),
        status: state.membership.status(),
        uptime_seconds: state.membership.uptime().as_secs(),
        capacity_bytes: state.capacity_bytes,
        usage_bytes,
    })
}
