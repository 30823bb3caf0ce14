//! Local media streaming over HTTP.
//!
//! `GET /media/<percent-encoded path>` serves a local file, honoring
//! `Range: bytes=` requests. A semaphore caps how many requests are being
//! classified and opened at once.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::media_url::decode_path_component;

/// Route prefix for media requests
pub const MEDIA_ROUTE_PREFIX: &str = "/media/";

/// Read size for streamed bodies
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Errors that can occur when running the stream server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),

    #[error("Invalid bind address '{0}'")]
    InvalidAddress(String),
}

/// What a file is, by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video(&'static str),
    Image(&'static str),
    Unsupported,
}

impl MediaKind {
    pub fn classify(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "mp4" | "m4v" => MediaKind::Video("video/mp4"),
            "mov" => MediaKind::Video("video/quicktime"),
            "mkv" => MediaKind::Video("video/x-matroska"),
            "webm" => MediaKind::Video("video/webm"),
            "avi" => MediaKind::Video("video/x-msvideo"),
            "ts" => MediaKind::Video("video/mp2t"),
            "png" => MediaKind::Image("image/png"),
            "jpg" | "jpeg" => MediaKind::Image("image/jpeg"),
            "gif" => MediaKind::Image("image/gif"),
            "webp" => MediaKind::Image("image/webp"),
            "bmp" => MediaKind::Image("image/bmp"),
            _ => MediaKind::Unsupported,
        }
    }

    pub fn content_type(&self) -> Option<&'static str> {
        match *self {
            MediaKind::Video(ct) | MediaKind::Image(ct) => Some(ct),
            MediaKind::Unsupported => None,
        }
    }
}

/// A parsed `Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=START-` or `bytes=START-END`
    From { start: u64, end: Option<u64> },
    /// `bytes=-LEN`
    Suffix(u64),
}

impl ByteRange {
    /// Parse a single-range header value
    pub fn parse(value: &str) -> Option<Self> {
        let ranges = value.trim().strip_prefix("bytes=")?;
        let (start, end) = ranges.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            return end.parse().ok().map(ByteRange::Suffix);
        }
        let start = start.parse().ok()?;
        let end = if end.is_empty() {
            None
        } else {
            Some(end.parse().ok()?)
        };
        Some(ByteRange::From { start, end })
    }

    /// Inclusive `(start, end)` within a file of `size` bytes, if satisfiable
    pub fn resolve(&self, size: u64) -> Option<(u64, u64)> {
        if size == 0 {
            return None;
        }
        let last = size - 1;
        match *self {
            ByteRange::From { start, end } => {
                let end = end.unwrap_or(last).min(last);
                (start <= end).then_some((start, end))
            }
            ByteRange::Suffix(0) => None,
            ByteRange::Suffix(len) => Some((size.saturating_sub(len), last)),
        }
    }
}

/// Shared state of the media router
#[derive(Debug, Clone)]
pub struct StreamState {
    workers: Arc<Semaphore>,
}

impl StreamState {
    /// State with `workers` concurrent request slots; 0 means one per CPU
    pub fn new(workers: usize) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(effective_workers(workers))),
        }
    }

    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }
}

/// Worker slots for a configured value
pub fn effective_workers(configured: usize) -> usize {
    if configured == 0 {
        num_cpus::get().max(1)
    } else {
        configured
    }
}

fn status(code: StatusCode, message: &str) -> Response {
    (code, message.to_string()).into_response()
}

/// Handler for GET /media/*path
async fn serve_media(State(state): State<StreamState>, uri: Uri, headers: HeaderMap) -> Response {
    let Ok(_permit) = state.workers.acquire().await else {
        return status(StatusCode::SERVICE_UNAVAILABLE, "server shutting down");
    };

    let encoded = uri
        .path()
        .strip_prefix(MEDIA_ROUTE_PREFIX)
        .unwrap_or_default();
    let path = match decode_path_component(encoded) {
        Ok(path) if path.is_absolute() => path,
        _ => return status(StatusCode::BAD_REQUEST, "invalid media path"),
    };

    let kind = MediaKind::classify(&path);
    let Some(content_type) = kind.content_type() else {
        debug!(path = %path.display(), "Rejecting unsupported media type");
        return status(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported media type");
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(ByteRange::parse);

    match serve_file(&path, content_type, range).await {
        Ok(response) => response,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            status(StatusCode::NOT_FOUND, "media not found")
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            status(StatusCode::FORBIDDEN, "media not readable")
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Media read failed");
            status(StatusCode::INTERNAL_SERVER_ERROR, "media read failed")
        }
    }
}

/// Stream `path` in full or the requested range
async fn serve_file(
    path: &Path,
    content_type: &'static str,
    range: Option<ByteRange>,
) -> std::io::Result<Response> {
    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();

    let Some(range) = range else {
        let body = Body::from_stream(ReaderStream::with_capacity(file, STREAM_CHUNK_SIZE));
        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type.to_string()),
                (header::CONTENT_LENGTH, size.to_string()),
                (header::ACCEPT_RANGES, "bytes".to_string()),
            ],
            body,
        )
            .into_response());
    };

    let Some((start, end)) = range.resolve(size) else {
        return Ok((
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{}", size))],
            Body::empty(),
        )
            .into_response());
    };

    let length = end - start + 1;
    file.seek(std::io::SeekFrom::Start(start)).await?;
    let body = Body::from_stream(ReaderStream::with_capacity(
        file.take(length),
        STREAM_CHUNK_SIZE,
    ));

    Ok((
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", start, end, size),
            ),
            (header::CONTENT_LENGTH, length.to_string()),
            (header::ACCEPT_RANGES, "bytes".to_string()),
        ],
        body,
    )
        .into_response())
}

/// Creates the axum Router with the media endpoint
pub fn create_stream_router(state: StreamState) -> Router {
    Router::new()
        .route("/media/*path", get(serve_media))
        .with_state(state)
}

/// Runs the media server on `config.bind` until it fails
pub async fn run_stream_server(config: &ServerConfig) -> Result<(), ServerError> {
    let addr: SocketAddr = config
        .bind
        .parse()
        .map_err(|_| ServerError::InvalidAddress(config.bind.clone()))?;
    let state = StreamState::new(config.workers as usize);
    info!(%addr, workers = state.available_workers(), "Media server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, create_stream_router(state)).await?;

    Ok(())
}
