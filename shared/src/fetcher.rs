/// The download pipeline: validate, probe, name, download, locate.
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::errors::DownloadError;
use crate::filename::sanitize_filename;
use crate::models::{FetchEvent, FormatInfo};
use crate::platform::{parse_video_url, DownloadOptions, Platform};
use crate::tools::{check_ffmpeg, has_audio_stream};
use crate::ytdlp::YtDlp;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov"];

const LOGGED_FORMATS: usize = 5;

/// A downloaded file waiting to be sent. Dropping it removes the temporary directory.
#[derive(Debug)]
pub struct FetchedVideo {
    dir: TempDir,
    path: PathBuf,
    filename: String,
    size: u64,
}

impl FetchedVideo {
    pub fn new(dir: TempDir, path: PathBuf, filename: String, size: u64) -> Self {
        Self {
            dir,
            path,
            filename,
            size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Name offered to the browser (`<caption>.mp4`).
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn content_type(&self) -> &'static str {
        "video/mp4"
    }

    /// Remove the temp dir on tokio's blocking pool. Outside a runtime the
    /// dir is removed inline and `None` is returned.
    pub fn release(self) -> Option<JoinHandle<()>> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn_blocking(move || drop(self))),
            Err(_) => None,
        }
    }
}

/// Runs yt-dlp for web requests.
#[derive(Debug, Clone)]
pub struct VideoFetcher {
    ytdlp: YtDlp,
    ffmpeg_bin: String,
    ffprobe_bin: String,
    require_ffmpeg: bool,
    extra_paths: Vec<PathBuf>,
    temp_root: Option<PathBuf>,
}

impl VideoFetcher {
    pub fn new(ytdlp: YtDlp) -> Self {
        Self {
            ytdlp,
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            require_ffmpeg: true,
            extra_paths: Vec::new(),
            temp_root: None,
        }
    }

    pub fn with_ffmpeg(mut self, ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        self.ffmpeg_bin = ffmpeg_bin.into();
        self.ffprobe_bin = ffprobe_bin.into();
        self
    }

    pub fn with_require_ffmpeg(mut self, require: bool) -> Self {
        self.require_ffmpeg = require;
        self
    }

    pub fn with_extra_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.extra_paths = paths;
        self
    }

    /// Create per-request directories under `root` instead of the system temp dir.
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    /// Whether ffmpeg is usable with the configured binary and PATH.
    pub async fn ffmpeg_available(&self) -> bool {
        check_ffmpeg(&self.ffmpeg_bin, &self.extra_paths).await
    }

    /// List the formats yt-dlp offers for `raw_url`.
    pub async fn list_formats(&self, raw_url: &str) -> Result<Vec<FormatInfo>, DownloadError> {
        let url = parse_video_url(raw_url)?;
        let options = DownloadOptions::for_platform(Platform::detect(&url));
        let info = self.ytdlp.probe(url.as_str(), &options).await?;
        Ok(info.formats)
    }

    /// Download the best stream of `raw_url` into a fresh temporary directory.
    pub async fn fetch(
        &self,
        raw_url: &str,
        events: Option<&UnboundedSender<FetchEvent>>,
    ) -> Result<FetchedVideo, DownloadError> {
        let url = parse_video_url(raw_url)?;
        if self.require_ffmpeg && !self.ffmpeg_available().await {
            return Err(DownloadError::FfmpegMissing);
        }

        let platform = Platform::detect(&url);
        info!("Attempting to download video from URL: {} (platform: {})", url, platform);

        let options = DownloadOptions::for_platform(platform);
        let dir = self.temp_dir()?;
        debug!("Created temp directory: {}", dir.path().display());

        info!("Extracting video information...");
        let info = self.ytdlp.probe(url.as_str(), &options).await?;

        info!("Available formats: {}", info.formats.len());
        for fmt in info.formats.iter().take(LOGGED_FORMATS) {
            info!(
                "Format: {} - {} - {} - {} - {}",
                fmt.format_id.as_deref().unwrap_or("?"),
                fmt.ext.as_deref().unwrap_or("?"),
                fmt.resolution.as_deref().unwrap_or("?"),
                fmt.vcodec.as_deref().unwrap_or("?"),
                fmt.acodec.as_deref().unwrap_or("?"),
            );
        }

        let video_id = info
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(short_id);
        let raw_caption = info.raw_caption(&video_id);
        let mut caption = sanitize_filename(&raw_caption);
        if caption.is_empty() {
            caption = format!("video_{}", video_id);
        }
        let filename = format!("{}.mp4", caption);
        info!("Video ID: {}, file name: {}", video_id, filename);

        if let Some(tx) = events {
            let _ = tx.send(FetchEvent::Started {
                video_id: video_id.clone(),
                title: info.title.clone(),
                filename: filename.clone(),
            });
        }

        info!("Starting video download...");
        self.ytdlp
            .download(url.as_str(), &options, dir.path(), |update| {
                debug!("Progress: {} {:?}%", update.status, update.percent);
                if let Some(tx) = events {
                    let _ = tx.send(FetchEvent::Progress(update));
                }
            })
            .await?;

        let path = find_downloaded_file(dir.path(), platform == Platform::Instagram).await?;
        let size = tokio::fs::metadata(&path).await?.len();
        info!("Using file: {} ({} bytes)", path.display(), size);

        has_audio_stream(&self.ffprobe_bin, &path).await;

        Ok(FetchedVideo::new(dir, path, filename, size))
    }

    fn temp_dir(&self) -> Result<TempDir, DownloadError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("vidfetch-");
        let dir = match &self.temp_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn has_video_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.iter().any(|v| e.eq_ignore_ascii_case(v)))
        .unwrap_or(false)
}

/// Pick the downloaded file out of `dir`.
///
/// Prefers mp4/m4v/mov; Instagram posts may come back in another container,
/// so for them any finished file is accepted.
pub async fn find_downloaded_file(dir: &Path, accept_any: bool) -> Result<PathBuf, DownloadError> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name.ends_with(".part") || name.ends_with(".ytdl") {
            continue;
        }
        names.push(name);
    }
    names.sort();

    if let Some(name) = names.iter().find(|n| has_video_extension(n)) {
        return Ok(dir.join(name));
    }

    error!("No downloaded video files found in {}; files present: {:?}", dir.display(), names);

    match names.first() {
        Some(name) if accept_any => {
            info!("Using first available file: {}", name);
            Ok(dir.join(name))
        }
        _ => Err(DownloadError::FileNotFound { instagram: accept_any }),
    }
}
