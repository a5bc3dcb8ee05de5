//! HTTP server for the billing report API.
//!
//! # API Endpoints
//!
//! | Method | Path                                  | Description                        |
//! |--------|---------------------------------------|------------------------------------|
//! | GET    | `/health`, `/api/health`              | Health check                       |
//! | POST   | `/api/process-azure`                  | Upload an Azure export (.xlsx)     |
//! | POST   | `/api/process-tencent`                | Upload a Tencent export (.xlsx/.csv) |
//! | GET    | `/api/processed-files`                | List generated workbooks           |
//! | GET    | `/api/download/{provider}/{filename}` | Download one workbook              |
//! | GET    | `/api/download-all/{type}`            | Zip of `azure`, `tencent` or `all` |
//! | GET    | `/api/logs`                           | SSE stream for real-time logs      |

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::{get, post},
    Router,
};
use chrono::{Local, Utc};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use uuid::Uuid;

use super::logs::{log_error, log_info, log_success, LOG_BROADCASTER};
use super::types::{
    attachment_disposition, error_response, FileEntry, FileListResponse, ProcessResponse,
    ProviderFiles,
};
use crate::config::ServerConfig;
use crate::error::{PipelineError, ServerResult, StoreError, UploadError};
use crate::models::Provider;
use crate::store::{ArchiveSelector, FsOutputStore, OutputStore};
use crate::transform::pipeline::{process_upload, validate_upload};
use crate::transform::rules::RuleSet;

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

type ApiError = (StatusCode, Json<Value>);

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OutputStore>,
    pub rules: Arc<RuleSet>,
    pub max_upload_bytes: usize,
}

/// Start the HTTP server
pub async fn start_server(config: ServerConfig) -> ServerResult<()> {
    let store = FsOutputStore::open(&config.output_dir)?;
    let rules = match config.rules_dir {
        Some(ref dir) => RuleSet::from_dir(dir)
            .map_err(|e| crate::error::ServerError::Config(e.to_string()))?,
        None => RuleSet::builtin(),
    };

    let state = AppState {
        store: Arc::new(store),
        rules: Arc::new(rules),
        max_upload_bytes: config.max_upload_bytes,
    };
    let app = build_router(state, &config);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    println!("🚀 Billing report server running on http://localhost:{}", config.port);
    println!("   POST /api/process-azure    - Upload Azure export");
    println!("   POST /api/process-tencent  - Upload Tencent export");
    println!("   GET  /api/processed-files  - List generated reports");
    println!("   GET  /api/download-all/:t  - Zip reports (azure|tencent|all)");
    println!("   GET  /api/logs             - SSE log stream");
    println!("   GET  /api/health           - Health check");
    println!();
    println!("📁 Output: {}", config.output_dir.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Assemble routes, CORS, body limit and static files.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let allow_origin = if config.cors_origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            config
                .cors_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    let router = Router::new()
        .route("/health", get(health))
        .route("/api/health", get(health))
        .route("/api/process-azure", post(process_azure))
        .route("/api/process-tencent", post(process_tencent))
        .route("/api/processed-files", get(list_files))
        .route("/api/download/{provider}/{filename}", get(download_file))
        .route("/api/download-all/{selector}", get(download_all))
        .route("/api/logs", get(sse_logs))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes + MULTIPART_OVERHEAD))
        .layer(cors)
        .with_state(state);

    if config.static_dir.is_dir() {
        router.fallback_service(ServeDir::new(&config.static_dir))
    } else {
        router
    }
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "ok",
        "service": "billreport",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        // Lagged receivers just skip missed entries
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn process_azure(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ProcessResponse>, ApiError> {
    handle_upload(state, Provider::Azure, multipart).await
}

async fn process_tencent(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ProcessResponse>, ApiError> {
    handle_upload(state, Provider::Tencent, multipart).await
}

/// Shared upload flow: read the `file` field, validate, process off the
/// async runtime.
async fn handle_upload(
    state: AppState,
    provider: Provider,
    mut multipart: Multipart,
) -> Result<Json<ProcessResponse>, ApiError> {
    let mut file_data: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(e.status(), &format!("Multipart error: {}", e.body_text())))?
    {
        if field.name() == Some("file") {
            file_name = Some(field.file_name().unwrap_or("").to_string());
            let bytes = field
                .bytes()
                .await
                .map_err(|e| api_error(e.status(), &format!("Read error: {}", e.body_text())))?;
            file_data = Some(bytes.to_vec());
        }
    }

    let bytes = file_data.ok_or_else(|| pipeline_error(UploadError::MissingFile.into()))?;
    validate_upload(provider, file_name.as_deref(), bytes.len(), state.max_upload_bytes)
        .map_err(|e| pipeline_error(e.into()))?;
    let file_name = file_name.unwrap_or_default();

    let job_id = Uuid::new_v4();
    println!("\n{}", "=".repeat(70));
    log_info(format!(
        "📄 NEW {} UPLOAD: {} ({} bytes) [{}]",
        provider.display_name().to_uppercase(),
        file_name,
        bytes.len(),
        job_id
    ));

    let today = Local::now().date_naive();
    let outcome = tokio::task::spawn_blocking(move || {
        let rules = state.rules.get(provider);
        process_upload(provider, &file_name, &bytes, rules, state.store.as_ref(), today)
    })
    .await
    .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, &format!("Worker failed: {}", e)))?
    .map_err(|e| {
        log_error(format!("Processing failed: {}", e));
        pipeline_error(e)
    })?;

    log_success(format!(
        "Done: {} file(s), {} records, total {:.2}",
        outcome.files.len(),
        outcome.total_records,
        outcome.total_amount
    ));
    println!("{}\n", "=".repeat(70));

    Ok(Json(ProcessResponse::new(job_id, outcome)))
}

/// List generated workbooks for every provider
async fn list_files(State(state): State<AppState>) -> Result<Json<FileListResponse>, ApiError> {
    let store = state.store.clone();
    let files = tokio::task::spawn_blocking(move || -> Result<ProviderFiles, StoreError> {
        let entries = |provider: Provider| -> Result<Vec<FileEntry>, StoreError> {
            Ok(store
                .list(provider)?
                .into_iter()
                .map(|f| FileEntry::new(provider, f))
                .collect())
        };
        Ok(ProviderFiles {
            azure: entries(Provider::Azure)?,
            tencent: entries(Provider::Tencent)?,
        })
    })
    .await
    .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?
    .map_err(store_error)?;

    Ok(Json(FileListResponse::new(files)))
}

/// Download one generated workbook
async fn download_file(
    State(state): State<AppState>,
    Path((provider, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let provider: Provider = provider
        .parse()
        .map_err(|e: String| api_error(StatusCode::NOT_FOUND, &e))?;

    let store = state.store.clone();
    let name = filename.clone();
    let bytes = tokio::task::spawn_blocking(move || store.get(provider, &name))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?
        .map_err(store_error)?;

    Ok(attachment(bytes, XLSX_MIME, &filename))
}

/// Zip every workbook for the selected providers
async fn download_all(
    State(state): State<AppState>,
    Path(selector): Path<String>,
) -> Result<Response, ApiError> {
    let selector: ArchiveSelector = selector
        .parse()
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "Invalid download type, expected azure, tencent or all"))?;

    let store = state.store.clone();
    let bytes = tokio::task::spawn_blocking(move || store.archive(selector))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?
        .map_err(store_error)?;

    let zip_name = format!(
        "{}_reports_{}.zip",
        selector.as_str(),
        Local::now().date_naive().format("%Y-%m-%d")
    );
    log_info(format!("🗜️  Archive {} ({} bytes)", zip_name, bytes.len()));

    Ok(attachment(bytes, "application/zip", &zip_name))
}

fn attachment(bytes: Vec<u8>, content_type: &'static str, file_name: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, attachment_disposition(file_name)),
        ],
        bytes,
    )
        .into_response()
}

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(error_response(message)))
}

fn pipeline_error(err: PipelineError) -> ApiError {
    api_error(err.status_code(), &err.to_string())
}

fn store_error(err: StoreError) -> ApiError {
    api_error(err.status_code(), &err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_mapping() {
        let (status, body) = pipeline_error(UploadError::EmptyData.into());
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.0["success"], false);
        assert!(body.0["message"].as_str().unwrap().contains("no data"));
    }

    #[test]
    fn test_store_error_mapping() {
        let (status, _) = store_error(StoreError::Empty);
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = store_error(StoreError::InvalidName("../x".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_attachment_headers() {
        let response = attachment(vec![1, 2, 3], XLSX_MIME, "A_2026-10-19.xlsx");
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], XLSX_MIME);
        assert!(headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("filename=\"A_2026-10-19.xlsx\""));
    }

    fn test_state(dir: &std::path::Path) -> AppState {
        AppState {
            store: Arc::new(FsOutputStore::open(dir).unwrap()),
            rules: Arc::new(RuleSet::builtin()),
            max_upload_bytes: crate::config::DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    #[test]
    fn test_router_builds_without_static_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            output_dir: dir.path().to_path_buf(),
            static_dir: dir.path().join("missing"),
            ..ServerConfig::default()
        };
        let _router = build_router(test_state(dir.path()), &config);
    }

    fn multipart_request(
        uri: &str,
        field: &str,
        file_name: &str,
        content: &str,
    ) -> axum::http::Request<axum::body::Body> {
        let boundary = "billreport-test-boundary";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n{content}\r\n--{b}--\r\n",
            b = boundary,
        );
        axum::http::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
            .body(axum::body::Body::from(body))
            .unwrap()
    }

    async fn send(router: Router, request: axum::http::Request<axum::body::Body>) -> (StatusCode, Value) {
        use tower::ServiceExt;

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn test_router(dir: &std::path::Path) -> Router {
        let config = ServerConfig {
            output_dir: dir.to_path_buf(),
            static_dir: dir.join("missing"),
            ..ServerConfig::default()
        };
        build_router(test_state(dir), &config)
    }

    #[tokio::test]
    async fn test_upload_rejects_csv_for_azure() {
        let dir = tempfile::tempdir().unwrap();
        let request = multipart_request("/api/process-azure", "file", "bill.csv", "CustomerName,Quantity\nA,1\n");

        let (status, body) = send(test_router(dir.path()), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains(".csv"));
    }

    #[tokio::test]
    async fn test_upload_without_file_field() {
        let dir = tempfile::tempdir().unwrap();
        let request = multipart_request("/api/process-tencent", "document", "bill.csv", "a,b\n1,2\n");

        let (status, body) = send(test_router(dir.path()), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No file uploaded");
    }

    #[tokio::test]
    async fn test_tencent_csv_upload_through_router() {
        let dir = tempfile::tempdir().unwrap();
        let csv = "Owner Account ID,OriginalCost\n123,25.75\n456,1.25\n";
        let request = multipart_request("/api/process-tencent", "file", "bill.csv", csv);

        let (status, body) = send(test_router(dir.path()), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["summary"]["groups"], 2);
        let name = body["files"][0]["name"].as_str().unwrap();
        assert!(name.starts_with("tencent_123_") && name.ends_with(".xlsx"));
        assert_eq!(body["files"][0]["total"].as_f64(), Some(25.75));
    }

    #[tokio::test]
    async fn test_health_reports_version() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_list_files_groups_by_provider() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.store.put(Provider::Azure, "A_2026-10-19.xlsx", b"a").unwrap();
        state.store.put(Provider::Tencent, "tencent_1_2026-10-19.xlsx", b"t").unwrap();

        let Json(response) = match list_files(State(state)).await {
            Ok(json) => json,
            Err((status, _)) => panic!("listing failed with {}", status),
        };

        assert_eq!(response.summary.total_files, 2);
        assert_eq!(response.files.azure[0].name, "A_2026-10-19.xlsx");
        assert_eq!(response.files.tencent[0].provider, Provider::Tencent);
    }

    #[tokio::test]
    async fn test_download_missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let result = download_file(
            State(test_state(dir.path())),
            Path(("azure".to_string(), "nope.xlsx".to_string())),
        )
        .await;

        match result {
            Err((status, Json(body))) => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body["success"], false);
            }
            Ok(_) => panic!("expected 404"),
        }
    }

    #[tokio::test]
    async fn test_download_all_rejects_unknown_type() {
        let dir = tempfile::tempdir().unwrap();
        let status = |result: Result<Response, ApiError>| result.err().map(|(status, _)| status);

        let result = download_all(State(test_state(dir.path())), Path("aws".to_string())).await;
        assert_eq!(status(result), Some(StatusCode::BAD_REQUEST));

        let result = download_all(State(test_state(dir.path())), Path("all".to_string())).await;
        assert_eq!(status(result), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_download_all_returns_zip() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.store.put(Provider::Azure, "A_2026-10-19.xlsx", b"a").unwrap();

        let response = match download_all(State(state), Path("azure".to_string())).await {
            Ok(response) => response,
            Err((status, _)) => panic!("archive failed with {}", status),
        };

        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        assert!(response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("azure_reports_"));
    }
}
