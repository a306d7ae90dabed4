/// yt-dlp subprocess runner.
///
/// Spawns yt-dlp once per probe or download. Progress is read from stdout
/// through a fixed `--progress-template`; stderr is forwarded to tracing logs
/// and its tail is kept to classify failures.
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::DownloadError;
use crate::models::{ProgressUpdate, VideoInfo};
use crate::platform::DownloadOptions;
use crate::tools::augmented_path;

/// Marker at the start of every progress line we ask yt-dlp to print.
pub const PROGRESS_PREFIX: &str = "vidfetch|";

const PROGRESS_TEMPLATE: &str = "download:vidfetch|%(progress.status)s|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress.speed)s|%(progress.eta)s";

/// Output template inside the per-request directory.
pub const OUTPUT_TEMPLATE: &str = "%(id)s.%(ext)s";

const STDERR_TAIL_LINES: usize = 50;

const DEFAULT_TIMEOUT_SECS: u64 = 30 * 60;

/// How to run yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlp {
    /// Executable, e.g. `yt-dlp` or `python3`.
    program: String,
    /// Arguments placed before ours, e.g. `-m yt_dlp`.
    prefix_args: Vec<String>,
    /// Directories appended to the child's PATH (ffmpeg).
    extra_paths: Vec<PathBuf>,
    timeout: Duration,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
            extra_paths: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Build from a whitespace separated command line such as `python3 -m yt_dlp`.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_prefix_args(parts.map(String::from).collect()))
    }

    pub fn with_prefix_args(mut self, args: Vec<String>) -> Self {
        self.prefix_args = args;
        self
    }

    pub fn with_extra_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.extra_paths = paths;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = augmented_path(&self.extra_paths) {
            cmd.env("PATH", path);
        }
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> DownloadError {
        DownloadError::Spawn {
            program: self.program.clone(),
            reason: e.to_string(),
        }
    }

    /// Extract metadata without downloading (`--dump-single-json`).
    pub async fn probe(&self, url: &str, options: &DownloadOptions) -> Result<VideoInfo, DownloadError> {
        let mut cmd = self.command();
        cmd.args(options.to_args())
            .arg("--dump-single-json")
            .arg("--")
            .arg(url);

        debug!("Probing {} with {}", url, self.program);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| DownloadError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| self.spawn_error(e))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            debug!(target: "ytdlp", "{}", line);
        }

        if !output.status.success() {
            warn!("yt-dlp probe exited with {}", output.status);
            return Err(DownloadError::from_stderr(&stderr));
        }

        parse_video_info(&String::from_utf8_lossy(&output.stdout))
    }

    /// Download `url` into `out_dir`, reporting progress to `on_progress`.
    pub async fn download<F>(
        &self,
        url: &str,
        options: &DownloadOptions,
        out_dir: &Path,
        mut on_progress: F,
    ) -> Result<(), DownloadError>
    where
        F: FnMut(ProgressUpdate) + Send,
    {
        let output_template = out_dir.join(OUTPUT_TEMPLATE);

        let mut cmd = self.command();
        cmd.args(options.to_args())
            .arg("--newline")
            .arg("--progress-template")
            .arg(PROGRESS_TEMPLATE)
            .arg("--output")
            .arg(&output_template)
            .arg("--")
            .arg(url);

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        info!("yt-dlp spawned (pid: {:?}) for {}", child.id(), url);

        let stdout = child.stdout.take().ok_or_else(|| {
            DownloadError::Io(std::io::Error::other("yt-dlp stdout not captured"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            DownloadError::Io(std::io::Error::other("yt-dlp stderr not captured"))
        })?;

        let stderr_task = tokio::spawn(collect_stderr(stderr));

        let run = async {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            while let Some(line) = read_lossy_line(&mut reader, &mut buf).await? {
                match parse_progress_line(&line) {
                    Some(update) => on_progress(update),
                    None if !line.trim().is_empty() => debug!(target: "ytdlp", "{}", line),
                    None => {}
                }
            }
            child.wait().await
        };

        let outcome = tokio::time::timeout(self.timeout, run).await;
        let status = match outcome {
            Ok(result) => result?,
            Err(_) => {
                warn!("yt-dlp did not finish in {}s, killing", self.timeout.as_secs());
                let _ = child.kill().await;
                return Err(DownloadError::Timeout(self.timeout.as_secs()));
            }
        };

        let stderr_tail = stderr_task.await.unwrap_or_default();

        if !status.success() {
            warn!("yt-dlp exited with {}", status);
            return Err(DownloadError::from_stderr(&stderr_tail));
        }

        info!("yt-dlp finished: {}", url);
        Ok(())
    }
}

/// Read one line, replacing invalid UTF-8 (console codepages on Windows).
/// Returns `None` at EOF.
async fn read_lossy_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Forward stderr to tracing and return its last lines. Drains to EOF.
async fn collect_stderr<R: AsyncRead + Unpin>(stderr: R) -> String {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        let line = match read_lossy_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Reading yt-dlp stderr failed: {}", e);
                break;
            }
        };
        debug!(target: "ytdlp", "{}", line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect::<Vec<_>>().join("\n")
}

/// Parse `--dump-single-json` output.
pub fn parse_video_info(stdout: &str) -> Result<VideoInfo, DownloadError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Err(DownloadError::NoInfo);
    }

    let value: serde_json::Value =
        serde_json::from_str(trimmed).map_err(|e| DownloadError::InvalidInfo(e.to_string()))?;
    if !value.is_object() {
        return Err(DownloadError::InvalidInfo(format!("expected an object, got {}", value)));
    }

    serde_json::from_value(value).map_err(|e| DownloadError::InvalidInfo(e.to_string()))
}

/// Parse one stdout line into a progress update.
///
/// Understands our template line and, as a fallback, yt-dlp's default
/// `[download]  42.0% of ...` line.
pub fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) {
        let fields: Vec<&str> = rest.split('|').collect();
        if fields.len() != 6 {
            return None;
        }

        let status = fields[0].trim().to_string();
        let downloaded_bytes = parse_number(fields[1]).map(|v| v as u64);
        let total_bytes = parse_number(fields[2])
            .or_else(|| parse_number(fields[3]))
            .map(|v| v as u64);

        let percent = match (downloaded_bytes, total_bytes) {
            (Some(done), Some(total)) if total > 0 => {
                Some((done as f64 / total as f64 * 100.0).min(100.0))
            }
            _ if status == "finished" => Some(100.0),
            _ => None,
        };

        return Some(ProgressUpdate {
            status,
            downloaded_bytes,
            total_bytes,
            speed: parse_number(fields[4]),
            eta_seconds: parse_number(fields[5]).map(|v| v as u64),
            percent,
        });
    }

    if let Some(rest) = line.strip_prefix("[download]") {
        let pct = rest.split_whitespace().next()?.strip_suffix('%')?;
        let pct: f64 = pct.parse().ok()?;
        return Some(ProgressUpdate {
            status: "downloading".to_string(),
            percent: Some(pct.clamp(0.0, 100.0)),
            ..Default::default()
        });
    }

    None
}

fn parse_number(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() || field == "NA" || field == "None" {
        return None;
    }
    field.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_template_line() {
        let update = parse_progress_line("vidfetch|downloading|512|1024|NA|2048.5|3").unwrap();
        assert_eq!(update.status, "downloading");
        assert_eq!(update.downloaded_bytes, Some(512));
        assert_eq!(update.total_bytes, Some(1024));
        assert_eq!(update.percent, Some(50.0));
        assert_eq!(update.speed, Some(2048.5));
        assert_eq!(update.eta_seconds, Some(3));
    }

    #[test]
    fn test_template_line_uses_estimate() {
        let update = parse_progress_line("vidfetch|downloading|250|NA|1000.0|NA|NA").unwrap();
        assert_eq!(update.total_bytes, Some(1000));
        assert_eq!(update.percent, Some(25.0));
        assert_eq!(update.speed, None);
    }

    #[test]
    fn test_finished_without_sizes() {
        let update = parse_progress_line("vidfetch|finished|NA|NA|NA|NA|NA").unwrap();
        assert_eq!(update.percent, Some(100.0));
    }

    #[test]
    fn test_default_progress_line() {
        let update = parse_progress_line("[download]  42.7% of ~  10.00MiB at  1.00MiB/s ETA 00:05").unwrap();
        assert_eq!(update.percent, Some(42.7));
    }

    #[test]
    fn test_non_progress_lines() {
        assert!(parse_progress_line("[download] Destination: /tmp/x.mp4").is_none());
        assert!(parse_progress_line("[youtube] abc: Downloading webpage").is_none());
        assert!(parse_progress_line("vidfetch|broken").is_none());
        assert!(parse_progress_line("").is_none());
    }

    #[test]
    fn test_parse_video_info() {
        assert!(matches!(parse_video_info(""), Err(DownloadError::NoInfo)));
        assert!(matches!(parse_video_info("null\n"), Err(DownloadError::NoInfo)));
        assert!(matches!(parse_video_info("[1,2]"), Err(DownloadError::InvalidInfo(_))));
        let info = parse_video_info(r#"{"id":"abc","title":"Hello"}"#).unwrap();
        assert_eq!(info.title.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_from_command_line() {
        let ytdlp = YtDlp::from_command_line("python3 -m yt_dlp").unwrap();
        assert_eq!(ytdlp.program(), "python3");
        assert_eq!(ytdlp.prefix_args, vec!["-m", "yt_dlp"]);
        assert!(YtDlp::from_command_line("   ").is_none());
    }

    #[cfg(unix)]
    fn script_ytdlp(dir: &Path, body: &str) -> YtDlp {
        let script = dir.join("fake-yt-dlp.sh");
        std::fs::write(&script, body).unwrap();
        YtDlp::new("sh").with_prefix_args(vec![script.display().to_string()])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_success() {
        let dir = tempfile::tempdir().unwrap();
        let ytdlp = script_ytdlp(
            dir.path(),
            r#"echo '{"id":"abc123","title":"Clip","formats":[{"format_id":"22","ext":"mp4"}]}'"#,
        );
        let opts = DownloadOptions::for_platform(Platform::Other);
        let info = ytdlp.probe("https://example.com/v", &opts).await.unwrap();
        assert_eq!(info.id.as_deref(), Some("abc123"));
        assert_eq!(info.formats[0].format_id.as_deref(), Some("22"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_failure_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let ytdlp = script_ytdlp(
            dir.path(),
            "echo 'ERROR: [youtube] abc: Private video' >&2\nexit 1\n",
        );
        let opts = DownloadOptions::for_platform(Platform::YouTube);
        let err = ytdlp.probe("https://youtu.be/abc", &opts).await.unwrap_err();
        assert!(matches!(err, DownloadError::Private(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_download_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let ytdlp = script_ytdlp(
            dir.path(),
            "echo '[youtube] abc: Downloading webpage'\n\
             echo 'vidfetch|downloading|5|10|NA|1.0|1'\n\
             echo 'vidfetch|finished|10|10|NA|NA|NA'\n\
             echo 'some warning' >&2\n",
        );
        let opts = DownloadOptions::for_platform(Platform::Other);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        ytdlp
            .download("https://example.com/v", &opts, out.path(), move |p| {
                sink.lock().unwrap().push(p)
            })
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].percent, Some(50.0));
        assert_eq!(seen[1].status, "finished");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_download_survives_non_utf8_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let ytdlp = script_ytdlp(
            dir.path(),
            "printf '[info] caf\\351\\n'\n\
             echo 'vidfetch|finished|10|10|NA|NA|NA'\n\
             printf 'WARNING: caf\\351\\n' >&2\n",
        );
        let opts = DownloadOptions::for_platform(Platform::Other);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        ytdlp
            .download("https://example.com/v", &opts, out.path(), move |p| {
                sink.lock().unwrap().push(p)
            })
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_error_after_non_utf8_stderr_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let ytdlp = script_ytdlp(
            dir.path(),
            "printf 'WARNING: caf\\351\\n' >&2\n\
             echo 'ERROR: [youtube] abc: Private video' >&2\n\
             exit 1\n",
        );
        let opts = DownloadOptions::for_platform(Platform::Other);
        let err = ytdlp
            .download("https://example.com/v", &opts, out.path(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Private(_)));
        assert!(err.is_client_error());
        assert_eq!(err.user_message(), "This video is private and cannot be downloaded.");
    }

    #[tokio::test]
    async fn test_lossy_line_reader() {
        let mut reader: &[u8] = b"caf\xe9\r\nnext\nlast";
        let mut buf = Vec::new();
        assert_eq!(read_lossy_line(&mut reader, &mut buf).await.unwrap().unwrap(), "caf\u{FFFD}");
        assert_eq!(read_lossy_line(&mut reader, &mut buf).await.unwrap().unwrap(), "next");
        assert_eq!(read_lossy_line(&mut reader, &mut buf).await.unwrap().unwrap(), "last");
        assert!(read_lossy_line(&mut reader, &mut buf).await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_download_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let ytdlp = script_ytdlp(dir.path(), "sleep 5\n").with_timeout(Duration::from_millis(200));
        let opts = DownloadOptions::for_platform(Platform::Other);
        let err = ytdlp
            .download("https://example.com/v", &opts, out.path(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let ytdlp = YtDlp::new("/nonexistent/vidfetch/yt-dlp");
        let opts = DownloadOptions::for_platform(Platform::Other);
        let err = ytdlp.probe("https://example.com/v", &opts).await.unwrap_err();
        assert!(matches!(err, DownloadError::Spawn { .. }));
    }
}
