/// Runtime configuration read from the environment (and `.env` via dotenvy).
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use vidfetch_shared::fetcher::VideoFetcher;
use vidfetch_shared::tools::discover_extra_paths;
use vidfetch_shared::ytdlp::YtDlp;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub issues_dir: PathBuf,
    pub static_dir: PathBuf,
    /// yt-dlp command line; extra words become leading arguments.
    pub ytdlp_cmd: String,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    /// Directory holding ffmpeg, added to PATH for child processes.
    pub ffmpeg_path: Option<PathBuf>,
    pub require_ffmpeg: bool,
    pub download_timeout_secs: u64,
    pub ticket_ttl_secs: u64,
    pub ticket_cleanup_secs: u64,
    pub temp_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            issues_dir: PathBuf::from("issues"),
            static_dir: PathBuf::from("web/static"),
            ytdlp_cmd: "yt-dlp".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            ffmpeg_path: None,
            require_ffmpeg: true,
            download_timeout_secs: 1800,
            ticket_ttl_secs: 600,
            ticket_cleanup_secs: 60,
            temp_dir: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Config::default();

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_or(get("PORT"), "PORT", defaults.port)?,
            issues_dir: get("ISSUES_DIR").map(PathBuf::from).unwrap_or(defaults.issues_dir),
            static_dir: get("STATIC_DIR").map(PathBuf::from).unwrap_or(defaults.static_dir),
            ytdlp_cmd: get("YTDLP_BIN").unwrap_or(defaults.ytdlp_cmd),
            ffmpeg_bin: get("FFMPEG_BIN").unwrap_or(defaults.ffmpeg_bin),
            ffprobe_bin: get("FFPROBE_BIN").unwrap_or(defaults.ffprobe_bin),
            ffmpeg_path: get("FFMPEG_PATH").map(PathBuf::from),
            require_ffmpeg: parse_bool(get("REQUIRE_FFMPEG"), "REQUIRE_FFMPEG", defaults.require_ffmpeg)?,
            download_timeout_secs: parse_or(
                get("DOWNLOAD_TIMEOUT_SECS"),
                "DOWNLOAD_TIMEOUT_SECS",
                defaults.download_timeout_secs,
            )?,
            ticket_ttl_secs: parse_or(get("TICKET_TTL_SECS"), "TICKET_TTL_SECS", defaults.ticket_ttl_secs)?,
            ticket_cleanup_secs: parse_or(
                get("TICKET_CLEANUP_SECS"),
                "TICKET_CLEANUP_SECS",
                defaults.ticket_cleanup_secs,
            )?
            .max(1),
            temp_dir: get("VIDFETCH_TMP_DIR").map(PathBuf::from),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Assemble the download pipeline described by this config.
    pub fn build_fetcher(&self) -> Result<VideoFetcher> {
        let extra_paths = discover_extra_paths(self.ffmpeg_path.as_deref());
        let ytdlp = YtDlp::from_command_line(&self.ytdlp_cmd)
            .context("YTDLP_BIN must name a program")?
            .with_extra_paths(extra_paths.clone())
            .with_timeout(Duration::from_secs(self.download_timeout_secs));

        let mut fetcher = VideoFetcher::new(ytdlp)
            .with_ffmpeg(self.ffmpeg_bin.clone(), self.ffprobe_bin.clone())
            .with_require_ffmpeg(self.require_ffmpeg)
            .with_extra_paths(extra_paths);
        if let Some(dir) = &self.temp_dir {
            fetcher = fetcher.with_temp_root(dir.clone());
        }
        Ok(fetcher)
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{} must be a number, got {:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}

fn parse_bool(value: Option<String>, key: &str, default: bool) -> Result<bool> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => anyhow::bail!("{} must be true or false, got {:?}", key, other),
    }
}
