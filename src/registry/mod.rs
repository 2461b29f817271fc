//! Registry API
//!
//! The read-only slice of the Docker Registry HTTP API v2 a pull needs.
//! Repository names have one segment (`alpine`) or two (`library/alpine`).
//! Any resolution failure is answered with 404.

pub mod handlers;

#[cfg(test)]
mod tests;

use crate::pipeline::ResolutionPipeline;

use axum::{Extension, Router, routing::get};
use std::sync::Arc;

pub fn registry_router(pipeline: Arc<ResolutionPipeline>) -> Router {
    Router::new()
        .route("/v2/", get(handlers::handle_api_version))
        .route(
            "/v2/:name/manifests/:reference",
            get(handlers::handle_get_manifest).head(handlers::handle_head_manifest),
        )
        .route(
            "/v2/:name/:image/manifests/:reference",
            get(handlers::handle_get_namespaced_manifest)
                .head(handlers::handle_head_namespaced_manifest),
        )
        .route(
            "/v2/:name/blobs/:digest",
            get(handlers::handle_get_blob).head(handlers::handle_head_blob),
        )
        .route(
            "/v2/:name/:image/blobs/:digest",
            get(handlers::handle_get_namespaced_blob).head(handlers::handle_head_namespaced_blob),
        )
        .layer(Extension(pipeline))
}
