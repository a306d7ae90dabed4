/// HTTP handlers for the vidfetch web front-end.
use axum::body::Body;
use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::{Form, Json};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use vidfetch_shared::errors::{DownloadError, IssueError};
use vidfetch_shared::fetcher::FetchedVideo;
use vidfetch_shared::filename::content_disposition;
use vidfetch_shared::models::{FetchEvent, IssueReport};
use vidfetch_shared::platform::parse_video_url;

use crate::AppState;

const INDEX_HTML: &str = include_str!("../static/index.html");

// ====== REQUEST / RESPONSE TYPES ======

/// Error response body.
#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

#[derive(Deserialize, Default)]
pub struct UrlForm {
    #[serde(default)]
    pub url: String,
}

#[derive(Serialize)]
struct ReadyBody<'a> {
    ticket: &'a str,
    filename: &'a str,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

/// Map a pipeline failure to the status and message the browser sees.
fn download_error(err: DownloadError) -> ApiError {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    if status.is_server_error() {
        error!("Download failed: {}", err);
    } else {
        warn!("Download rejected: {}", err);
    }
    api_error(status, err.user_message())
}

/// A missing or non-form body is treated like an empty `url` field.
fn form_url(form: Result<Form<UrlForm>, FormRejection>) -> String {
    match form {
        Ok(Form(body)) => body.url,
        Err(e) => {
            warn!("Unreadable form body: {}", e);
            String::new()
        }
    }
}

/// Holds a download's temp dir while its response body is alive.
struct BodyGuard(Option<FetchedVideo>);

impl Drop for BodyGuard {
    fn drop(&mut self) {
        if let Some(video) = self.0.take() {
            let _ = video.release();
        }
    }
}

/// Stream `video` to the client. The temp dir lives until the body is dropped.
async fn file_response(video: FetchedVideo) -> Result<Response, ApiError> {
    let file = tokio::fs::File::open(video.path()).await.map_err(|e| {
        error!("Cannot open {}: {}", video.path().display(), e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Cannot open file: {}", e))
    })?;

    let headers = [
        (header::CONTENT_TYPE, video.content_type().to_string()),
        (header::CONTENT_DISPOSITION, content_disposition(video.filename())),
        (header::CONTENT_LENGTH, video.size().to_string()),
    ];
    info!("Sending {} ({} bytes)", video.filename(), video.size());

    let guard = BodyGuard(Some(video));
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _held = &guard;
        chunk
    });

    Ok((StatusCode::OK, headers, Body::from_stream(stream)).into_response())
}

// ====== PAGES ======

/// GET /
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "message": "Video downloader is running",
    }))
}

// ====== DOWNLOADS ======

/// POST /download - fetch and send the file in one request
pub async fn download(
    State(state): State<Arc<AppState>>,
    form: Result<Form<UrlForm>, FormRejection>,
) -> Result<Response, ApiError> {
    let url = form_url(form);
    let video = state.fetcher.fetch(&url, None).await.map_err(download_error)?;
    file_response(video).await
}

/// GET /download/events?url= - progress as Server-Sent Events, ending in a ticket
pub async fn download_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UrlForm>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    parse_video_url(&query.url).map_err(download_error)?;

    let (tx, rx) = mpsc::unbounded_channel::<FetchEvent>();
    let task_state = state.clone();
    let url = query.url;

    // `tx` is dropped when the task returns, which ends the progress stream.
    let handle = tokio::spawn(async move {
        let video = task_state.fetcher.fetch(&url, Some(&tx)).await?;
        let filename = video.filename().to_string();
        let ticket = task_state.tickets.store(video).await;
        info!("File ready: {} (ticket {})", filename, ticket);
        Ok::<_, DownloadError>((ticket, filename))
    });

    let progress = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(fetch_event(&event)), rx))
    });
    let finish = stream::once(async move { Ok(finish_event(handle.await)) });

    Ok(Sse::new(progress.chain(finish)).keep_alive(KeepAlive::default()))
}

fn fetch_event(event: &FetchEvent) -> Event {
    let name = match event {
        FetchEvent::Started { .. } => "started",
        FetchEvent::Progress(_) => "progress",
    };
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(name).data(data)
}

fn finish_event(joined: Result<Result<(String, String), DownloadError>, JoinError>) -> Event {
    let message = match joined {
        Ok(Ok((ticket, filename))) => {
            let body = ReadyBody {
                ticket: &ticket,
                filename: &filename,
            };
            let data = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());
            return Event::default().event("done").data(data);
        }
        Ok(Err(e)) => {
            let (_, Json(body)) = download_error(e);
            body.error
        }
        Err(e) => {
            error!("Download task failed: {}", e);
            "An unexpected error occurred".to_string()
        }
    };
    let data = serde_json::json!({ "error": message }).to_string();
    Event::default().event("error").data(data)
}

/// GET /download/file/:ticket - collect a file announced by the event stream
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(ticket): Path<String>,
) -> Result<Response, ApiError> {
    let video = state.tickets.take(&ticket).await.ok_or_else(|| {
        api_error(StatusCode::NOT_FOUND, "File not found or already downloaded")
    })?;
    file_response(video).await
}

/// POST /debug-formats - list what yt-dlp offers for a URL
pub async fn debug_formats(
    State(state): State<Arc<AppState>>,
    form: Result<Form<UrlForm>, FormRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let url = form_url(form);

    let formats = match state.fetcher.list_formats(&url).await {
        Ok(formats) => formats,
        Err(e @ (DownloadError::MissingUrl | DownloadError::InvalidUrl { .. })) => {
            return Err(download_error(e));
        }
        Err(e) => {
            error!("Error getting formats: {}", e);
            Vec::new()
        }
    };

    if formats.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Could not extract format information",
        ));
    }

    Ok(Json(serde_json::json!({ "formats": formats })))
}

// ====== ISSUES ======

/// POST /report-issue
pub async fn report_issue(
    State(state): State<Arc<AppState>>,
    body: Result<Json<IssueReport>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(report) = body.map_err(|e| {
        warn!("Rejected issue report: {}", e);
        api_error(StatusCode::BAD_REQUEST, "Invalid JSON body")
    })?;

    match state.issues.report(report) {
        Ok(issue) => Ok(Json(serde_json::json!({
            "message": "Issue reported successfully",
            "id": issue.id,
        }))),
        Err(e @ IssueError::MissingField(_)) => Err(api_error(StatusCode::BAD_REQUEST, e.to_string())),
        Err(e) => {
            error!("Error reporting issue: {}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to report issue"))
        }
    }
}
