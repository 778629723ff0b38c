//! HTTP API: image upload, listing, and analysis lookup.
//!
//! The upload handler is the producer side of the pipeline: it stores
//! the image first and publishes the work message second. There is no
//! transactional coupling between the two; a failed publish leaves the
//! image stored but un-analyzed.

use crate::config::ApiConfig;
use crate::listing::{list_images, ImageEntry};
use anyhow::{Context, Result};
use axum::{
    extract::{Multipart, Path as UrlPath, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use iris_core::model::{metadata_key, AnalysisRecord, WorkItem};
use iris_core::queue::WorkQueue;
use iris_core::store::{ArtifactStore, StoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub images: Arc<dyn ArtifactStore>,
    pub metadata: Arc<dyn ArtifactStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub url_expiry: Duration,
}

/// Query parameters for the image listing
#[derive(Debug, Deserialize)]
pub struct ImageListQuery {
    /// Case-insensitive substring filter on the name
    pub q: Option<String>,
    /// Include display URLs in the response
    #[serde(default)]
    pub include_urls: bool,
}

/// One image in the listing response
#[derive(Debug, Serialize)]
pub struct ImageWithUrl {
    #[serde(flatten)]
    pub image: ImageEntry,
    /// Display URL (if requested and the backend supports one)
    pub url: Option<String>,
}

/// Image listing response
#[derive(Debug, Serialize)]
pub struct ImageListResponse {
    pub images: Vec<ImageWithUrl>,
}

/// Upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Generated artifact name; analysis runs asynchronously
    pub name: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: &str, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/images", get(list_handler).post(upload_handler))
        .route("/api/v1/images/:name/analysis", get(analysis_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "iris-gallery"
    }))
}

/// List images with analysis status
#[instrument(skip(state))]
async fn list_handler(
    State(state): State<AppState>,
    Query(params): Query<ImageListQuery>,
) -> Result<Json<ImageListResponse>, ApiError> {
    let entries = list_images(
        state.images.as_ref(),
        state.metadata.as_ref(),
        params.q.as_deref(),
    )
    .await
    .map_err(|e| {
        error!(error = %e, "Failed to list images");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to list images",
            "LIST_ERROR",
        )
    })?;

    let mut images = Vec::with_capacity(entries.len());
    for entry in entries {
        let url = if params.include_urls {
            match state.images.url_for(&entry.name, state.url_expiry).await {
                Ok(url) => url,
                Err(e) => {
                    // A broken signer should not take the listing down
                    warn!(artifact = %entry.name, error = %e, "Failed to generate display URL");
                    None
                }
            }
        } else {
            None
        };
        images.push(ImageWithUrl { image: entry, url });
    }

    Ok(Json(ImageListResponse { images }))
}

/// Upload an image and enqueue it for analysis
#[instrument(skip(state, multipart))]
async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let mut upload: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            &format!("Invalid multipart body: {}", e),
            "BAD_MULTIPART",
        )
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field.bytes().await.map_err(|e| {
            api_error(
                StatusCode::BAD_REQUEST,
                &format!("Failed to read file field: {}", e),
                "BAD_MULTIPART",
            )
        })?;

        upload = Some((file_name, content_type, bytes.to_vec()));
        break;
    }

    let Some((file_name, content_type, bytes)) = upload else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "No file uploaded",
            "MISSING_FILE",
        ));
    };

    if bytes.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Uploaded file is empty",
            "EMPTY_FILE",
        ));
    }

    let name = artifact_name(&file_name);

    state
        .images
        .put(&name, bytes, &content_type)
        .await
        .map_err(|e| {
            error!(artifact = %name, error = %e, "Failed to store upload");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store upload",
                "STORE_ERROR",
            )
        })?;

    state
        .queue
        .publish(WorkItem::new(name.clone()).encode())
        .await
        .map_err(|e| {
            // Image stays stored but un-analyzed; surfacing the error is
            // all the producer contract asks for
            error!(artifact = %name, error = %e, "Failed to enqueue work item");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Upload stored but analysis could not be enqueued",
                "ENQUEUE_ERROR",
            )
        })?;

    info!(artifact = %name, "Image uploaded and enqueued for analysis");

    Ok((StatusCode::CREATED, Json(UploadResponse { name })))
}

/// Fetch the analysis record for one image
#[instrument(skip(state))]
async fn analysis_handler(
    State(state): State<AppState>,
    UrlPath(name): UrlPath<String>,
) -> Result<Json<AnalysisRecord>, ApiError> {
    let bytes = state
        .metadata
        .get(&metadata_key(&name))
        .await
        .map_err(|e| match e {
            StoreError::NotFound(_) => api_error(
                StatusCode::NOT_FOUND,
                "Image has not been analyzed",
                "NOT_ANALYZED",
            ),
            other => {
                error!(artifact = %name, error = %other, "Failed to fetch analysis record");
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to fetch analysis record",
                    "FETCH_ERROR",
                )
            }
        })?;

    let record: AnalysisRecord = serde_json::from_slice(&bytes).map_err(|e| {
        warn!(artifact = %name, error = %e, "Stored analysis record is malformed");
        api_error(
            StatusCode::NOT_FOUND,
            "Image has not been analyzed",
            "NOT_ANALYZED",
        )
    })?;

    Ok(Json(record))
}

/// Generate the stored artifact name for an upload: a fresh UUID with
/// the original extension kept for content-type sniffing by browsers.
fn artifact_name(file_name: &str) -> String {
    match Path::new(file_name).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext.to_lowercase()),
        None => Uuid::new_v4().to_string(),
    }
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting gallery API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
