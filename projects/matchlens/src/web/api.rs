use crate::error::PipelineError;
use crate::job::{JobHandle, JobRecord, OutputMap};
use crate::pipeline::types::parse_products;
use crate::web::server::AppState;
use axum::{
    extract::{multipart::Field, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

const UPLOADS_DIR: &str = "uploads";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", e))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(message) = &self {
            tracing::error!("Request failed: {}", message);
        }
        let status = self.status_code();
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub(crate) fn find_job(state: &AppState, id: u64) -> ApiResult<Arc<JobHandle>> {
    state
        .registry
        .get(id)
        .ok_or_else(|| ApiError::NotFound(format!("job {} not found", id)))
}

#[derive(Deserialize)]
pub struct ProduceQuery {
    #[serde(default)]
    pub produce: String,
}

/// Accept an upload, validate it and queue a job for it.
pub async fn create_job(
    State(state): State<AppState>,
    Query(query): Query<ProduceQuery>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<JobRecord>)> {
    let produce = parse_products(&query.produce).map_err(|e: PipelineError| {
        ApiError::BadRequest(e.to_string())
    })?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("file") {
            upload = Some(save_upload(&state, field).await?);
            break;
        }
    }
    let upload = upload.ok_or_else(|| ApiError::BadRequest("file required".to_string()))?;

    if let Err(e) = check_duration(&state, &upload).await {
        remove_upload(&upload).await;
        return Err(e);
    }

    let job = match state.registry.create(upload.clone(), produce) {
        Ok(job) => job,
        Err(e) => {
            remove_upload(&upload).await;
            return Err(e.into());
        }
    };
    let record = job.snapshot();
    state.pool.submit(job);
    Ok((StatusCode::CREATED, Json(record)))
}

async fn remove_upload(upload: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(upload).await {
        tracing::warn!("Failed to remove rejected upload {}: {}", upload.display(), e);
    }
}

async fn save_upload(state: &AppState, mut field: Field<'_>) -> ApiResult<PathBuf> {
    let dir = state.registry.media_root().join(UPLOADS_DIR);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let original = field
        .file_name()
        .and_then(|name| std::path::Path::new(name).file_name())
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload.mp4".to_string());
    let path = dir.join(format!("{}-{}", Utc::now().format("%Y%m%d%H%M%S%f"), original));

    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let written: ApiResult<()> = async {
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(e);
    }
    Ok(path)
}

async fn check_duration(state: &AppState, upload: &std::path::Path) -> ApiResult<()> {
    let source = state.source.clone();
    let path = upload.to_path_buf();
    let measured = tokio::task::spawn_blocking(move || source.read_duration(&path))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let seconds = measured.map_err(|e| ApiError::BadRequest(format!("could not read video: {:#}", e)))?;
    if seconds > state.max_seconds + 0.01 {
        return Err(ApiError::BadRequest(format!(
            "video longer than {} seconds",
            state.max_seconds
        )));
    }
    Ok(())
}

pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobRecord>> {
    Json(state.registry.list())
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<JobRecord>> {
    Ok(Json(find_job(&state, id)?.snapshot()))
}

/// Output map of a job; empty until it is done.
pub async fn get_job_files(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<OutputMap>> {
    Ok(Json(find_job(&state, id)?.snapshot().outputs))
}

/// Drop a finished job with its outputs and upload.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<StatusCode> {
    let job = find_job(&state, id)?;
    let record = job.snapshot();
    if !record.status.is_terminal() {
        return Err(ApiError::Conflict(format!("job {} is still {}", id, record.status)));
    }

    state.registry.remove(id);
    if let Err(e) = tokio::fs::remove_dir_all(job.output_dir()).await {
        tracing::warn!("Failed to remove {}: {}", job.output_dir().display(), e);
    }
    let uploads = state.registry.media_root().join(UPLOADS_DIR);
    if record.original.starts_with(&uploads) {
        if let Err(e) = tokio::fs::remove_file(&record.original).await {
            tracing::debug!("Upload {} already gone: {}", record.original.display(), e);
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::web::server::{router, tests::test_state};
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::Value;
    use tempfile::tempdir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "matchlens-test-boundary";

    fn upload_request(uri: &str, with_file: bool) -> Request<Body> {
        let mut body = String::new();
        if with_file {
            body.push_str(&format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"clip.mp4\"\r\n\
                 Content-Type: video/mp4\r\n\r\nnot really a video\r\n",
                b = BOUNDARY
            ));
        } else {
            body.push_str(&format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n",
                b = BOUNDARY
            ));
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn upload_count(root: &std::path::Path) -> usize {
        std::fs::read_dir(root.join(UPLOADS_DIR))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_create_job_accepts_short_clip() {
        let dir = tempdir().unwrap();
        let app = router(test_state(dir.path(), 12.0));

        let response = app
            .oneshot(upload_request("/api/jobs?produce=voronoi,detections", true))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let job = json_body(response).await;
        assert_eq!(job["id"], 1);
        assert_eq!(job["produce"], serde_json::json!(["detections", "voronoi"]));
        assert_eq!(upload_count(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_create_job_rejects_unknown_products() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), 12.0);
        let app = router(state.clone());

        let response = app
            .oneshot(upload_request("/api/jobs?produce=heatmap,detections", true))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "invalid produce values: [\"heatmap\"]");
        assert!(state.registry.list().is_empty());
        assert_eq!(upload_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_create_job_rejects_long_clip_and_removes_upload() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), 30.5);
        let app = router(state.clone());

        let response = app.oneshot(upload_request("/api/jobs", true)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "video longer than 30 seconds");
        assert!(state.registry.list().is_empty());
        assert_eq!(upload_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_create_job_tolerates_rounding() {
        let dir = tempdir().unwrap();
        let app = router(test_state(dir.path(), 30.005));
        let response = app.oneshot(upload_request("/api/jobs", true)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_create_job_requires_file() {
        let dir = tempdir().unwrap();
        let app = router(test_state(dir.path(), 1.0));
        let response = app.oneshot(upload_request("/api/jobs", false)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "file required");
    }

    #[tokio::test]
    async fn test_create_job_failure_removes_upload() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), 1.0);
        // a plain file where the next job's output directory would go
        std::fs::write(dir.path().join("outputs").join("1"), b"").unwrap();

        let response = router(state.clone())
            .oneshot(upload_request("/api/jobs", true))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(state.registry.list().is_empty());
        assert_eq!(upload_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_delete_job() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), 1.0);
        let uploads = dir.path().join(UPLOADS_DIR);
        std::fs::create_dir_all(&uploads).unwrap();
        let upload = uploads.join("clip.mp4");
        std::fs::write(&upload, b"video").unwrap();

        let running = state
            .registry
            .create("other.mp4".into(), std::collections::BTreeSet::new())
            .unwrap();
        running.start().unwrap();
        let response = router(state.clone())
            .oneshot(
                Request::delete(format!("/api/jobs/{}", running.id()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(state.registry.get(running.id()).is_some());

        let done = state
            .registry
            .create(upload.clone(), std::collections::BTreeSet::new())
            .unwrap();
        done.start().unwrap();
        done.complete(OutputMap::new()).unwrap();
        let output_dir = done.output_dir().to_path_buf();

        let response = router(state.clone())
            .oneshot(
                Request::delete(format!("/api/jobs/{}", done.id()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.registry.get(done.id()).is_none());
        assert!(!output_dir.exists());
        assert!(!upload.exists());

        let response = router(state)
            .oneshot(
                Request::delete(format!("/api/jobs/{}", done.id()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_job_and_files() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), 1.0);
        let job = state
            .registry
            .create("clip.mp4".into(), std::collections::BTreeSet::new())
            .unwrap();

        let response = router(state.clone())
            .oneshot(
                Request::get(format!("/api/jobs/{}", job.id()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], JobStatus::Pending.as_str());

        let response = router(state.clone())
            .oneshot(
                Request::get(format!("/api/jobs/{}/files", job.id()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(response).await, serde_json::json!({}));

        let response = router(state)
            .oneshot(Request::get("/api/jobs/99").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
