/// Error types for the download pipeline and the issue reporter.
use thiserror::Error;

/// Errors raised while turning a URL into a downloaded file.
///
/// Most variants come straight out of yt-dlp's stderr; see [`DownloadError::from_stderr`].
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no URL provided")]
    MissingUrl,

    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("ffmpeg not found")]
    FfmpegMissing,

    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("yt-dlp timed out after {0}s")]
    Timeout(u64),

    #[error("API page unavailable: {0}")]
    ApiAccess(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("private video: {0}")]
    Private(String),

    #[error("video unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported URL: {0}")]
    Unsupported(String),

    #[error("yt-dlp failed: {0}")]
    Failed(String),

    #[error("yt-dlp returned no video information")]
    NoInfo,

    #[error("yt-dlp returned malformed video information: {0}")]
    InvalidInfo(String),

    #[error("downloaded file not found in output directory")]
    FileNotFound { instagram: bool },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Classify yt-dlp's stderr output.
    ///
    /// Only `ERROR:` lines are considered when present; otherwise the last
    /// non-empty line is used as the message.
    pub fn from_stderr(stderr: &str) -> Self {
        let message = error_lines(stderr);

        if message.contains("Unable to download API page") {
            DownloadError::ApiAccess(message)
        } else if message.contains("getaddrinfo failed")
            || message.contains("Name or service not known")
            || message.contains("Temporary failure in name resolution")
        {
            DownloadError::Network(message)
        } else if message.contains("Private video") {
            DownloadError::Private(message)
        } else if message.contains("Video unavailable") {
            DownloadError::Unavailable(message)
        } else if message.contains("Unsupported URL") {
            DownloadError::Unsupported(message)
        } else {
            DownloadError::Failed(message)
        }
    }

    /// Whether the failure is the caller's fault (bad input, private or
    /// missing video) rather than ours.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DownloadError::MissingUrl
                | DownloadError::InvalidUrl { .. }
                | DownloadError::ApiAccess(_)
                | DownloadError::Private(_)
                | DownloadError::Unavailable(_)
                | DownloadError::Unsupported(_)
                | DownloadError::NoInfo
                | DownloadError::InvalidInfo(_)
        )
    }

    /// Message shown to the user in the web UI.
    pub fn user_message(&self) -> String {
        match self {
            DownloadError::MissingUrl => "Please provide a URL".to_string(),
            DownloadError::InvalidUrl { .. } => {
                "Please provide a valid http(s) URL".to_string()
            }
            DownloadError::FfmpegMissing => {
                "ffmpeg is required but not installed. Please install ffmpeg manually.".to_string()
            }
            DownloadError::ApiAccess(_) => {
                "API access failed. The video might be region-blocked or private.".to_string()
            }
            DownloadError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            DownloadError::Private(_) => {
                "This video is private and cannot be downloaded.".to_string()
            }
            DownloadError::Unavailable(_) => {
                "This video is unavailable or has been removed.".to_string()
            }
            DownloadError::Unsupported(msg) | DownloadError::Failed(msg) => {
                format!("Download failed: {}", msg)
            }
            DownloadError::NoInfo => {
                "Could not extract video information. The URL might be invalid or the video might be private."
                    .to_string()
            }
            DownloadError::InvalidInfo(_) => "Invalid video information format".to_string(),
            DownloadError::FileNotFound { instagram: true } => {
                "Video downloaded but file not found. The post might be private or not contain a video."
                    .to_string()
            }
            DownloadError::FileNotFound { instagram: false } => {
                "Video downloaded but file not found".to_string()
            }
            DownloadError::Timeout(secs) => {
                format!("Download failed: timed out after {}s", secs)
            }
            DownloadError::Spawn { .. } | DownloadError::Io(_) => {
                format!("Unexpected error: {}", self)
            }
        }
    }
}

fn error_lines(stderr: &str) -> String {
    let errors: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("ERROR:"))
        .collect();

    if !errors.is_empty() {
        return errors.join("\n");
    }

    stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or("yt-dlp exited without an error message")
        .to_string()
}

/// Errors from the issue reporter.
#[derive(Debug, Error)]
pub enum IssueError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
