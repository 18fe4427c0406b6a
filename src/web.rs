use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::orchestrator::Orchestrator;
use crate::queue::QueueStats;
use crate::storage::{
    AssetUrlMode, LocalFileStorage, MAX_OBJECT_BYTES, ObjectStorage, StorageCategory, get_mime_type_from_key,
    verify_download,
};
use crate::worker::{JobReport, Worker};

pub const MAX_UPLOAD_BYTES: usize = MAX_OBJECT_BYTES;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub worker: Worker,
    pub storage: Arc<LocalFileStorage>,
    pub asset_urls: AssetUrlMode,
    pub worker_secret: Option<String>,
}

/// Paths for the routes that may sit behind the secret prefix.
#[derive(Debug, Clone)]
pub struct RoutePaths {
    pub upload: String,
    pub worker: String,
}

impl RoutePaths {
    pub fn for_config(config: &AppConfig) -> Self {
        Self {
            upload: config.scoped_path("/upload"),
            worker: config.scoped_path("/worker"),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct UploadResponse {
    url: String,
    key: String,
}

#[derive(Serialize)]
struct WorkerResponse {
    processed: usize,
    results: Vec<JobReport>,
    stats: QueueStats,
}

#[derive(Deserialize)]
pub struct DownloadQuery {
    expires: i64,
    signature: String,
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse { error: message.to_string() })).into_response()
}

/// Application routes. The asset root is mounted at `/cache` only in public
/// mode; signed mode serves assets through `/downloads` alone.
pub fn routes(state: AppState, paths: &RoutePaths) -> Router {
    let mut router = Router::new()
        .route(
            &paths.upload,
            post(handle_image_upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(&paths.worker, get(worker_status).post(run_worker))
        .route("/generations/{id}", get(get_generation))
        .route("/downloads/{*key}", get(download));
    if state.asset_urls == AssetUrlMode::Public {
        router = router.nest_service("/cache", ServeDir::new(state.storage.base_dir()));
    }
    router.with_state(state)
}

pub async fn handle_image_upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut content_type = None;
    let mut bytes = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() == Some("file") {
                    content_type = field.content_type().map(|value| value.to_string());
                    match field.bytes().await {
                        Ok(data) => bytes = Some(data),
                        Err(err) => {
                            return json_error(StatusCode::BAD_REQUEST, &format!("Failed to read file: {err}"));
                        }
                    }
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                return json_error(StatusCode::BAD_REQUEST, &format!("Failed to read form: {err}"));
            }
        }
    }

    if let Some(content_type) = content_type.as_deref() {
        if !content_type.starts_with("image/") {
            return json_error(StatusCode::BAD_REQUEST, "Unsupported file type");
        }
    }
    let Some(bytes) = bytes else {
        return json_error(StatusCode::BAD_REQUEST, "No file uploaded");
    };
    if bytes.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "Uploaded file is empty");
    }

    match state
        .storage
        .upload_buffer(bytes.as_ref(), StorageCategory::Images, content_type.as_deref())
        .await
    {
        Ok(stored) => {
            let url = state.storage.asset_url(&stored.key, state.asset_urls);
            tracing::info!(key = %stored.key, size = stored.size, "image uploaded");
            (StatusCode::OK, Json(UploadResponse { url, key: stored.key })).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "upload failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &format!("Failed to store file: {err}"))
        }
    }
}

pub async fn get_generation(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return json_error(StatusCode::BAD_REQUEST, "Invalid generation id");
    };
    match state.orchestrator.records().get(id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Generation not found"),
        Err(err) => {
            tracing::error!(generation_id = %id, error = %err, "failed to load generation");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load generation")
        }
    }
}

fn authorize_worker(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(secret) = state.worker_secret.as_deref() else {
        return Err(json_error(StatusCode::FORBIDDEN, "Worker endpoint is disabled"));
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    if presented == Some(secret) {
        Ok(())
    } else {
        Err(json_error(StatusCode::UNAUTHORIZED, "Unauthorized"))
    }
}

pub async fn run_worker(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize_worker(&state, &headers) {
        return response;
    }
    let results = state.worker.run_batch().await;
    let stats = state.orchestrator.queue().stats().await;
    Json(WorkerResponse {
        processed: results.len(),
        results,
        stats,
    })
    .into_response()
}

pub async fn worker_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize_worker(&state, &headers) {
        return response;
    }
    Json(state.orchestrator.queue().stats().await).into_response()
}

pub async fn download(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let now = Utc::now().timestamp();
    if !verify_download(state.storage.signing_secret(), &key, query.expires, &query.signature, now) {
        return json_error(StatusCode::FORBIDDEN, "Invalid or expired download link");
    }
    match state.storage.get(&key).await {
        Ok(Some(bytes)) => ([(header::CONTENT_TYPE, get_mime_type_from_key(&key))], bytes).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "File not found"),
        Err(err) => {
            tracing::error!(key = %key, error = %err, "failed to read download");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read file")
        }
    }
}
