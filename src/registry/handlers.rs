use crate::peer::protocol::HEADER_CONTENT_DIGEST;
use crate::pipeline::ResolutionPipeline;
use crate::storage::types::ManifestData;

use axum::{
    body::Body,
    extract::{Extension, Path},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

pub const HEADER_API_VERSION: &str = "Docker-Distribution-API-Version";
pub const API_VERSION: &str = "registry/2.0";

const BLOB_CONTENT_TYPE: &str = "application/octet-stream";

/// `/v2/<name>/...` or `/v2/<namespace>/<name>/...`
fn full_name(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(namespace) => format!("{}/{}", namespace, name),
        None => name.to_string(),
    }
}

fn artifact_headers(digest: &str, content_type: &str, length: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(digest) {
        headers.insert(HEADER_CONTENT_DIGEST, value);
    }
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers
}

fn manifest_headers(manifest: &ManifestData) -> HeaderMap {
    artifact_headers(&manifest.digest, &manifest.content_type, manifest.size())
}

pub async fn handle_api_version() -> impl IntoResponse {
    (StatusCode::OK, [(HEADER_API_VERSION, API_VERSION)], "{}")
}

// --- Manifests ---

pub async fn handle_get_manifest(
    Extension(pipeline): Extension<Arc<ResolutionPipeline>>,
    Path((name, reference)): Path<(String, String)>,
) -> Response {
    serve_manifest(&pipeline, full_name(None, &name), reference).await
}

pub async fn handle_get_namespaced_manifest(
    Extension(pipeline): Extension<Arc<ResolutionPipeline>>,
    Path((namespace, name, reference)): Path<(String, String, String)>,
) -> Response {
    serve_manifest(&pipeline, full_name(Some(&namespace), &name), reference).await
}

async fn serve_manifest(
    pipeline: &ResolutionPipeline,
    repository: String,
    reference: String,
) -> Response {
    tracing::info!("GET manifest {}:{}", repository, reference);

    match pipeline.resolve_manifest(&repository, &reference).await {
        Ok(manifest) => {
            let headers = manifest_headers(&manifest);
            (StatusCode::OK, headers, manifest.content).into_response()
        }
        Err(e) => {
            if e.is_expected() {
                tracing::info!("Manifest {}:{} unavailable: {}", repository, reference, e);
            } else {
                tracing::error!("Error resolving manifest {}:{}: {}", repository, reference, e);
            }
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

pub async fn handle_head_manifest(
    Extension(pipeline): Extension<Arc<ResolutionPipeline>>,
    Path((name, reference)): Path<(String, String)>,
) -> Response {
    head_manifest(&pipeline, full_name(None, &name), reference).await
}

pub async fn handle_head_namespaced_manifest(
    Extension(pipeline): Extension<Arc<ResolutionPipeline>>,
    Path((namespace, name, reference)): Path<(String, String, String)>,
) -> Response {
    head_manifest(&pipeline, full_name(Some(&namespace), &name), reference).await
}

async fn head_manifest(
    pipeline: &ResolutionPipeline,
    repository: String,
    reference: String,
) -> Response {
    match pipeline.manifest_head(&repository, &reference).await {
        Ok(Some(manifest)) => (StatusCode::OK, manifest_headers(&manifest)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::warn!("HEAD manifest {}:{} failed: {}", repository, reference, e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

// --- Blobs ---

pub async fn handle_get_blob(
    Extension(pipeline): Extension<Arc<ResolutionPipeline>>,
    Path((name, digest)): Path<(String, String)>,
) -> Response {
    serve_blob(&pipeline, full_name(None, &name), digest).await
}

pub async fn handle_get_namespaced_blob(
    Extension(pipeline): Extension<Arc<ResolutionPipeline>>,
    Path((namespace, name, digest)): Path<(String, String, String)>,
) -> Response {
    serve_blob(&pipeline, full_name(Some(&namespace), &name), digest).await
}

async fn serve_blob(pipeline: &ResolutionPipeline, repository: String, digest: String) -> Response {
    tracing::info!("GET blob {} for {}", digest, repository);

    match pipeline.resolve_blob(&repository, &digest).await {
        Ok(blob) => {
            let headers = artifact_headers(&blob.digest, BLOB_CONTENT_TYPE, blob.size);
            (StatusCode::OK, headers, Body::from_stream(blob.stream)).into_response()
        }
        Err(e) => {
            if e.is_expected() {
                tracing::info!("Blob {} unavailable: {}", digest, e);
            } else {
                tracing::error!("Error resolving blob {}: {}", digest, e);
            }
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

pub async fn handle_head_blob(
    Extension(pipeline): Extension<Arc<ResolutionPipeline>>,
    Path((_name, digest)): Path<(String, String)>,
) -> Response {
    head_blob(&pipeline, &digest).await
}

pub async fn handle_head_namespaced_blob(
    Extension(pipeline): Extension<Arc<ResolutionPipeline>>,
    Path((_namespace, _name, digest)): Path<(String, String, String)>,
) -> Response {
    head_blob(&pipeline, &digest).await
}

async fn head_blob(pipeline: &ResolutionPipeline, digest: &str) -> Response {
    match pipeline.blob_head(digest).await {
        Ok(Some(meta)) => (
            StatusCode::OK,
            artifact_headers(&meta.digest, BLOB_CONTENT_TYPE, meta.size),
        )
            .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::warn!("HEAD blob {} failed: {}", digest, e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
