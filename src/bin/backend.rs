use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, io::duplex, signal, task};
use tokio_util::io::{ReaderStream, SyncIoBridge};
use tubedrop_tools::{
    archive::{ARCHIVE_CONTENT_TYPE, ARCHIVE_FILE_NAME, stream_archive},
    catalog::{CatalogClient, CatalogEntry},
    config::load_runtime_config,
    error::PipelineError,
    pipeline::{BatchCoordinator, BatchResult, MediaItem, SkipLog, process_item, sweep_stale_workspaces},
    security::ensure_not_root,
};

const REQUIRED_PROGRAMS: &[&str] = &["yt-dlp", "ffmpeg"];
const ARCHIVE_PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    work_root: Arc<PathBuf>,
    skip_log: Arc<SkipLog>,
    catalog: Arc<CatalogClient>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadRequest {
    source_url: String,
    #[serde(default)]
    title: String,
}

#[derive(Deserialize)]
struct ArchiveRequest {
    items: Vec<DownloadRequest>,
}

#[derive(Serialize)]
struct SkippedResponse {
    skipped: Vec<String>,
}

#[derive(Serialize)]
struct PlaylistItemsResponse {
    items: Vec<CatalogEntry>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match err {
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    ensure_not_root("backend")?;

    let config = load_runtime_config().context("loading configuration")?;
    for program in REQUIRED_PROGRAMS {
        ensure_program_available(program)?;
    }

    std::fs::create_dir_all(&config.work_root)
        .with_context(|| format!("creating {}", config.work_root.display()))?;
    sweep_stale_workspaces(&config.work_root);

    let state = AppState {
        work_root: Arc::new(config.work_root),
        skip_log: Arc::new(SkipLog::default()),
        catalog: Arc::new(CatalogClient::new(config.catalog_url, config.catalog_token)),
    };

    let app = Router::new()
        .route("/api/download", post(download_single))
        .route("/api/download-archive", post(download_archive))
        .route("/api/skipped", get(last_skipped))
        .route("/api/playlists/{id}/items", get(playlist_items))
        .with_state(state);

    let addr = SocketAddr::new(
        config
            .listen_host
            .parse()
            .with_context(|| format!("parsing listen host {}", config.listen_host))?,
        config.listen_port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    println!("tubedrop backend listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running backend")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}

/// Runs `<name> --version` to fail loudly at startup when an external tool
/// the pipeline depends on is missing.
fn ensure_program_available(name: &str) -> Result<()> {
    let status = Command::new(name)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!("{} is installed but returned a failure status", name),
        Err(err) => bail!("{} is not installed or not in PATH: {}", name, err),
    }
}

async fn download_single(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> ApiResult<Response> {
    let item = MediaItem {
        source_url: request.source_url,
        title: request.title,
    };
    let work_root = state.work_root.clone();
    let output = task::spawn_blocking(move || process_item(&item, &work_root))
        .await
        .map_err(|err| ApiError::internal(format!("task join error: {err}")))?
        .map_err(ApiError::from)?;

    let file = File::open(&output.path)
        .await
        .map_err(|err| ApiError::internal(format!("opening merged output: {err}")))?;
    let download_name = output.archive_name.clone();
    // Unlinked before streaming; the open handle keeps the bytes readable
    // until the transfer ends.
    drop(output);

    let mime = MimeGuess::from_path(Path::new(&download_name)).first_or_octet_stream();
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    set_download_headers(&mut response, &mime.to_string(), &download_name);
    Ok(response)
}

async fn download_archive(
    State(state): State<AppState>,
    Json(request): Json<ArchiveRequest>,
) -> ApiResult<Response> {
    let items: Vec<MediaItem> = request
        .items
        .into_iter()
        .map(|item| MediaItem {
            source_url: item.source_url,
            title: item.title,
        })
        .collect();

    let coordinator = BatchCoordinator::new((*state.work_root).clone(), state.skip_log.clone());
    let BatchResult { succeeded, .. } = task::spawn_blocking(move || coordinator.run(&items))
        .await
        .map_err(|err| ApiError::internal(format!("task join error: {err}")))?
        .map_err(ApiError::from)?;

    // The archive is produced incrementally on a blocking thread and piped
    // straight into the response body; it is never materialized whole.
    let (reader, writer) = duplex(ARCHIVE_PIPE_CAPACITY);
    task::spawn_blocking(move || {
        let sink = SyncIoBridge::new(writer);
        if let Err(err) = stream_archive(succeeded, sink) {
            eprintln!("  Warning: archive transfer aborted: {err}");
        }
    });

    let mut response = Body::from_stream(ReaderStream::new(reader)).into_response();
    set_download_headers(&mut response, ARCHIVE_CONTENT_TYPE, ARCHIVE_FILE_NAME);
    Ok(response)
}

async fn last_skipped(State(state): State<AppState>) -> Json<SkippedResponse> {
    Json(SkippedResponse {
        skipped: state.skip_log.snapshot(),
    })
}

async fn playlist_items(
    State(state): State<AppState>,
    AxumPath(playlist_id): AxumPath<String>,
) -> ApiResult<Json<PlaylistItemsResponse>> {
    let catalog = state.catalog.clone();
    let items = task::spawn_blocking(move || catalog.playlist_items(&playlist_id))
        .await
        .map_err(|err| ApiError::internal(format!("task join error: {err}")))?
        .map_err(ApiError::from)?;
    Ok(Json(PlaylistItemsResponse { items }))
}

/// Attachment headers shared by both download responses. The disposition is
/// exposed cross-origin so browser callers can read the filename.
fn set_download_headers(response: &mut Response, content_type: &str, filename: &str) {
    let headers = response.headers_mut();
    if let Ok(value) = content_type.parse() {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = format!("attachment; filename=\"{filename}\"").parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = "Content-Disposition".parse() {
        headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, value);
    }
}
