// HTTP surface - JSON endpoints over the dispatcher, registry and backend

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, FromRequest, Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::downloader::models::{
    normalize_url, DownloadRequest, FormatsListing, JobStatus, JobStatusResponse, SearchResult,
};
use crate::downloader::tools::{ToolInfo, ToolLocator};
use crate::downloader::{Dispatcher, DownloadError, JobRegistry};
use crate::ytdlp::MAX_SEARCH_RESULTS;

const DEFAULT_SEARCH_LIMIT: usize = 5;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub tools: Arc<ToolLocator>,
}

impl AppState {
    fn registry(&self) -> &JobRegistry {
        self.dispatcher.registry()
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            error!("[api] {}", err);
            Self::internal(err.job_message())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// `Json` body whose rejections come back as `{"error": ...}`
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// Every route, with permissive CORS. `static_dir`, when given, answers
/// anything the API does not.
pub fn router(state: AppState, static_dir: Option<&FsPath>) -> Router {
    let routes = Router::new()
        .route("/api/search", post(search))
        .route("/api/formats", post(formats))
        .route("/api/download", post(start_download))
        .route("/api/status/{id}", get(job_status))
        .route("/api/file/{id}", get(download_file))
        .route("/api/tools", get(tools))
        .route("/api/health", get(health))
        // Older clients talk to the unprefixed paths
        .route("/formats", post(formats))
        .route("/download", post(start_download))
        .route("/status/{id}", get(job_status))
        .route("/file/{id}", get(download_file));

    let routes = match static_dir {
        Some(dir) => routes.fallback_service(ServeDir::new(dir)),
        None => routes.fallback(endpoint_not_found),
    };

    routes.layer(CorsLayer::permissive()).with_state(state)
}

async fn endpoint_not_found() -> ApiError {
    ApiError::not_found("endpoint not found")
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub limit: Option<usize>,
}

async fn search(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SearchRequest>,
) -> ApiResult<Json<Vec<SearchResult>>> {
    let query = request
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("Query is required"))?;
    let limit = request
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_RESULTS);

    let results = state.dispatcher.backend().search(query, limit).await?;
    Ok(Json(results))
}

#[derive(Debug, Default, Deserialize)]
pub struct FormatsRequest {
    pub url: Option<String>,
    /// Bare video id, used when `url` is absent
    pub id: Option<String>,
}

async fn formats(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<FormatsRequest>,
) -> ApiResult<Json<FormatsListing>> {
    let target = request
        .url
        .or(request.id)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("URL or video ID is required"))?;

    let listing = state
        .dispatcher
        .backend()
        .get_formats(&normalize_url(&target)?)
        .await?;
    Ok(Json(listing))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub job_id: String,
    /// Same value as `job_id`, for clients that poll by session
    pub session_id: String,
}

async fn start_download(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<DownloadRequest>,
) -> ApiResult<Json<StartResponse>> {
    let job_id = state.dispatcher.start(request)?;
    Ok(Json(StartResponse {
        session_id: job_id.clone(),
        job_id,
    }))
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    state
        .registry()
        .get(&id)
        .map(|job| Json(JobStatusResponse::from(job)))
        .ok_or_else(|| ApiError::not_found("Job not found"))
}

async fn download_file(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let job = state
        .registry()
        .get(&id)
        .ok_or_else(|| ApiError::not_found("Job not found"))?;
    if job.status != JobStatus::Completed {
        return Err(ApiError::not_found("File not ready"));
    }
    let path = job
        .file_path
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    info!("[api] Serving {} for job {}", path.display(), id);
    let prefix = format!("{}_", id);
    stream_file(path, &prefix).await
}

async fn tools(State(state): State<AppState>) -> Json<Vec<ToolInfo>> {
    Json(state.tools.tool_info().await)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub jobs: usize,
    pub active: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        jobs: state.registry().len(),
        active: state.registry().active_count(),
    })
}

/// Stream a finished file as an attachment. The job prefix is dropped from
/// the name the client saves under.
async fn stream_file(path: PathBuf, strip_prefix: &str) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("File not found"))?;
    let size = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("File not found"))?
        .len();

    let stored = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let download_name = stored
        .strip_prefix(strip_prefix)
        .filter(|n| !n.is_empty())
        .unwrap_or(&stored);

    let mime = MimeGuess::from_path(&path).first_or_octet_stream();
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref()).map_err(|e| ApiError::internal(e.to_string()))?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(download_name))
            .map_err(|e| ApiError::internal(e.to_string()))?,
    );
    Ok(response)
}

/// `attachment` with an ASCII fallback name plus the UTF-8 original
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::downloader::models::DownloadMode;
    use crate::downloader::testing::{FakeBackend, FakeOutcome};
    use crate::downloader::tools::ToolSettings;

    fn state(outcome: FakeOutcome, dir: &FsPath) -> AppState {
        let dispatcher = Dispatcher::new(
            JobRegistry::new(),
            Arc::new(FakeBackend::new(outcome)),
            2,
            dir.to_path_buf(),
        );
        let tools = ToolLocator::new(ToolSettings {
            ffmpeg_download_url: None,
            data_dir: dir.join("data"),
            bundled_dirs: Vec::new(),
            system_dirs: Vec::new(),
            search_path: false,
            ..Default::default()
        });
        AppState {
            dispatcher,
            tools: Arc::new(tools),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_download_status_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(FakeOutcome::Succeed(b"video bytes".to_vec()), dir.path());

        let Json(started) = start_download(
            State(state.clone()),
            ApiJson(DownloadRequest {
                url: Some("https://www.youtube.com/watch?v=abc".to_string()),
                quality: Some("720p".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(started.job_id, started.session_id);

        let mut job = None;
        for _ in 0..500 {
            let Json(current) = job_status(State(state.clone()), Path(started.job_id.clone()))
                .await
                .unwrap();
            assert_eq!(current.text, current.job.message);
            if current.job.status.is_terminal() {
                job = Some(current.job);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let job = job.expect("job never finished");
        assert_eq!(job.status, JobStatus::Completed);

        let response = download_file(State(state.clone()), Path(started.job_id.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"Fake Title.mp4\""));
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"video bytes");
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(FakeOutcome::Empty, dir.path());
        let err = job_status(State(state.clone()), Path("missing".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err = download_file(State(state), Path("missing".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_file_not_ready_or_gone_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(FakeOutcome::Empty, dir.path());
        let registry = state.registry().clone();
        registry
            .create("running".to_string(), "u".to_string(), DownloadMode::VideoAudio)
            .unwrap();
        registry
            .create("gone".to_string(), "u".to_string(), DownloadMode::VideoAudio)
            .unwrap();
        registry.mark_completed("gone", dir.path().join("gone_Title.mp4"));

        for id in ["running", "gone"] {
            let err = download_file(State(state.clone()), Path(id.to_string()))
                .await
                .unwrap_err();
            assert_eq!(err.status, StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn test_download_requires_url() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(FakeOutcome::Empty, dir.path());
        let err = start_download(State(state.clone()), ApiJson(DownloadRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "URL is required");
        assert!(state.registry().is_empty());
    }

    #[tokio::test]
    async fn test_formats_by_id_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(FakeOutcome::Empty, dir.path());

        let Json(listing) = formats(
            State(state.clone()),
            ApiJson(FormatsRequest {
                url: None,
                id: Some("abc".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(listing.video_formats, vec!["720p"]);

        let err = formats(State(state.clone()), ApiJson(FormatsRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = formats(
            State(state.clone()),
            ApiJson(FormatsRequest {
                url: None,
                id: Some("not an id".to_string()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.starts_with("Invalid URL"));

        let err = formats(
            State(state),
            ApiJson(FormatsRequest {
                url: Some("https://example.com/unsupported".to_string()),
                id: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(FakeOutcome::Empty, dir.path());

        let err = search(
            State(state.clone()),
            ApiJson(SearchRequest {
                query: Some("   ".to_string()),
                limit: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let Json(results) = search(
            State(state),
            ApiJson(SearchRequest {
                query: Some("lofi".to_string()),
                limit: Some(2),
            }),
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "lofi #0");
    }

    #[tokio::test]
    async fn test_health_and_tools() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(FakeOutcome::Empty, dir.path());
        let Json(health) = health(State(state.clone())).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.jobs, 0);

        let Json(tools) = tools(State(state)).await;
        assert_eq!(tools.len(), 2);
        assert!(!tools[1].is_available);
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::not_found("Job not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "Job not found");

        let response = ApiError::from(DownloadError::ToolNotFound("yt-dlp".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_bad_json_body_uses_error_shape() {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/search")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let err = ApiJson::<SearchRequest>::from_request(request, &()).await.err().unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let body = body_json(err.into_response()).await;
        assert!(body["error"].is_string());

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/download")
            .body(Body::from("{}"))
            .unwrap();
        let err = ApiJson::<DownloadRequest>::from_request(request, &()).await.err().unwrap();
        assert_eq!(err.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn test_content_disposition_non_ascii() {
        let value = content_disposition("Música \"live\".mp3");
        assert_eq!(
            value,
            "attachment; filename=\"M_sica _live_.mp3\"; filename*=UTF-8''M%C3%BAsica%20%22live%22.mp3"
        );
        assert!(HeaderValue::from_str(&value).is_ok());
    }

    #[tokio::test]
    async fn test_router_builds_with_and_without_static_dir() {
        let dir = tempfile::tempdir().unwrap();
        let _ = router(state(FakeOutcome::Empty, dir.path()), None);
        let _ = router(state(FakeOutcome::Empty, dir.path()), Some(dir.path()));
    }
}
