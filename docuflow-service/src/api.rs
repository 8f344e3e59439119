//! HTTP API for the document service.
//!
//! This module provides the REST API endpoints for:
//! - Health monitoring
//! - Document upload, metadata, artifacts, and deletion
//! - Folders
//! - Transforms and their cancellation
//! - Search and activity
//! - Dynamic settings

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRequestParts, OptionalFromRequestParts, State},
    http::request::Parts,
    routing::{delete, get, post},
};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ServiceError;
use crate::service::DocumentService;

pub mod documents;
pub mod folders;
pub mod search;
pub mod settings;
pub mod transforms;
use documents::{
    delete_document_handler, document_activity_handler, download_document_handler,
    get_document_handler, get_image_handler, list_activity_handler, list_documents_handler,
    list_images_handler, text_blocks_handler, update_document_handler, upload_document_handler,
};
use folders::{
    create_folder_handler, delete_folder_handler, folder_documents_handler, get_folder_handler,
    list_folders_handler, rename_folder_handler, upload_to_folder_handler,
};
use search::search_handler;
use settings::{get_settings_handler, update_settings_handler};
use transforms::{cancel_transform_handler, transform_document_handler};

/// Header carrying the acting user's id
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Actor recorded when a request carries no actor header
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// Application state
pub struct AppState {
    pub service: Arc<DocumentService>,
    pub start_time: Instant,
}

/// The acting user, from the `x-actor-id` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

impl Actor {
    fn from_parts(parts: &Parts) -> Option<Self> {
        parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Actor(value.to_string()))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts).unwrap_or_else(|| Actor(ANONYMOUS_ACTOR.to_string())))
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for Actor {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

/// Build the API router
pub fn router(service: Arc<DocumentService>) -> Router {
    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Uploads enforce the hot-reloadable size limit while reading the file field
        .route(
            "/documents",
            get(list_documents_handler)
                .post(upload_document_handler)
                .layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/documents/{id}",
            get(get_document_handler)
                .put(update_document_handler)
                .delete(delete_document_handler),
        )
        .route("/documents/{id}/download", get(download_document_handler))
        .route("/documents/{id}/text", get(text_blocks_handler))
        .route("/documents/{id}/images", get(list_images_handler))
        .route("/documents/{id}/images/{index}", get(get_image_handler))
        .route("/documents/{id}/activity", get(document_activity_handler))
        .route("/documents/{id}/transform", post(transform_document_handler))
        .route("/transforms/{request_id}", delete(cancel_transform_handler))
        .route(
            "/folders",
            get(list_folders_handler).post(create_folder_handler),
        )
        .route(
            "/folders/{id}",
            get(get_folder_handler)
                .put(rename_folder_handler)
                .delete(delete_folder_handler),
        )
        .route(
            "/folders/{id}/documents",
            get(folder_documents_handler)
                .post(upload_to_folder_handler)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/activity", get(list_activity_handler))
        .route("/search", get(search_handler))
        .route(
            "/settings",
            get(get_settings_handler).put(update_settings_handler),
        );

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let ai_available = state.service.ai_available().await;

    Json(HealthResponse {
        status: if ai_available { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        ai_available,
        indexed_documents: state.service.indexed_documents(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    ai_available: bool,
    indexed_documents: usize,
}
