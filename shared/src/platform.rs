/// URL validation, platform detection and per-platform yt-dlp options.
use url::Url;

use crate::errors::DownloadError;

const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const DEFAULT_FORMAT: &str = "bestvideo[height<=2160]+bestaudio/best[height<=2160]/best";
const YOUTUBE_FORMAT: &str = "bestvideo[height<=2160][ext=mp4]+bestaudio[ext=m4a]/bestvideo[height<=2160]+bestaudio/best[height<=2160]/best";

/// Validate a user-submitted URL.
pub fn parse_video_url(raw: &str) -> Result<Url, DownloadError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DownloadError::MissingUrl);
    }

    let invalid = |reason: String| DownloadError::InvalidUrl {
        url: trimmed.to_string(),
        reason,
    };

    let url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(invalid("missing host".to_string())),
    }
}

/// Sites that get tailored yt-dlp options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    YouTube,
    Instagram,
    Twitter,
    Other,
}

impl Platform {
    pub fn detect(url: &Url) -> Self {
        let host = match url.host_str() {
            Some(h) => h.to_ascii_lowercase(),
            None => return Platform::Other,
        };
        let matches = |domain: &str| host == domain || host.ends_with(&format!(".{}", domain));

        if matches("youtube.com") || matches("youtu.be") {
            Platform::YouTube
        } else if matches("instagram.com") {
            Platform::Instagram
        } else if matches("twitter.com") || matches("x.com") {
            Platform::Twitter
        } else {
            Platform::Other
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Platform::YouTube => "youtube",
            Platform::Instagram => "instagram",
            Platform::Twitter => "twitter",
            Platform::Other => "other",
        }
    }

    fn referer(&self) -> &str {
        match self {
            Platform::Instagram => "https://www.instagram.com/",
            Platform::Twitter => "https://twitter.com/",
            Platform::YouTube | Platform::Other => "https://www.youtube.com/",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// yt-dlp options for one download.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub format: String,
    pub referer: String,
    pub headers: Vec<(String, String)>,
    pub merge_output_format: String,
    pub extractor_retries: u32,
    pub socket_timeout_secs: u32,
    pub retries: u32,
    pub fragment_retries: u32,
    pub check_certificates: bool,
    pub no_playlist: bool,
}

impl DownloadOptions {
    /// Options for the given platform: best quality up to 2160p, remuxed to mp4.
    pub fn for_platform(platform: Platform) -> Self {
        let mut headers = vec![
            ("User-Agent".to_string(), CHROME_UA.to_string()),
            (
                "Accept".to_string(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8".to_string(),
            ),
            ("Accept-Language".to_string(), "en-US,en;q=0.5".to_string()),
            ("Accept-Encoding".to_string(), "gzip, deflate".to_string()),
        ];

        if platform == Platform::Instagram {
            headers.extend([
                ("X-IG-App-ID".to_string(), "936619743392459".to_string()),
                ("X-Requested-With".to_string(), "XMLHttpRequest".to_string()),
                ("X-ASBD-ID".to_string(), "198387".to_string()),
            ]);
        }

        let format = match platform {
            Platform::YouTube => YOUTUBE_FORMAT,
            _ => DEFAULT_FORMAT,
        };

        Self {
            format: format.to_string(),
            referer: platform.referer().to_string(),
            headers,
            merge_output_format: "mp4".to_string(),
            extractor_retries: 3,
            socket_timeout_secs: 30,
            retries: 5,
            fragment_retries: 5,
            check_certificates: false,
            no_playlist: true,
        }
    }

    /// Render as yt-dlp command line arguments (without URL or output template).
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--format".to_string(),
            self.format.clone(),
            "--referer".to_string(),
            self.referer.clone(),
            "--no-colors".to_string(),
            "--extractor-retries".to_string(),
            self.extractor_retries.to_string(),
            "--socket-timeout".to_string(),
            self.socket_timeout_secs.to_string(),
            "--retries".to_string(),
            self.retries.to_string(),
            "--fragment-retries".to_string(),
            self.fragment_retries.to_string(),
            "--skip-unavailable-fragments".to_string(),
            "--no-keep-video".to_string(),
            "--no-write-thumbnail".to_string(),
            "--no-write-subs".to_string(),
            "--no-write-auto-subs".to_string(),
            "--merge-output-format".to_string(),
            self.merge_output_format.clone(),
            "--recode-video".to_string(),
            self.merge_output_format.clone(),
            "--embed-metadata".to_string(),
        ];

        if !self.check_certificates {
            args.push("--no-check-certificates".to_string());
        }
        if self.no_playlist {
            args.push("--no-playlist".to_string());
        }
        for (name, value) in &self.headers {
            args.push("--add-header".to_string());
            args.push(format!("{}:{}", name, value));
        }

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(raw: &str) -> Platform {
        Platform::detect(&parse_video_url(raw).unwrap())
    }

    #[test]
    fn test_empty_url() {
        assert!(matches!(parse_video_url("   "), Err(DownloadError::MissingUrl)));
    }

    #[test]
    fn test_garbage_url() {
        assert!(matches!(
            parse_video_url("not a url"),
            Err(DownloadError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_non_http_scheme() {
        let err = parse_video_url("ftp://example.com/video.mp4").unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
        assert!(parse_video_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_trims_whitespace() {
        let url = parse_video_url("  https://youtu.be/dQw4w9WgXcQ \n").unwrap();
        assert_eq!(url.as_str(), "https://youtu.be/dQw4w9WgXcQ");
    }

    #[test]
    fn test_platform_detection() {
        assert_eq!(detect("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), Platform::YouTube);
        assert_eq!(detect("https://youtu.be/dQw4w9WgXcQ"), Platform::YouTube);
        assert_eq!(detect("https://m.YouTube.com/shorts/abc123def45"), Platform::YouTube);
        assert_eq!(detect("https://www.instagram.com/reel/Cxyz/"), Platform::Instagram);
        assert_eq!(detect("https://x.com/user/status/1"), Platform::Twitter);
        assert_eq!(detect("https://twitter.com/user/status/1"), Platform::Twitter);
        assert_eq!(detect("https://vimeo.com/123"), Platform::Other);
    }

    #[test]
    fn test_lookalike_domain_is_other() {
        assert_eq!(detect("https://notyoutube.com/watch?v=1"), Platform::Other);
        assert_eq!(detect("https://box.com/file"), Platform::Other);
    }

    #[test]
    fn test_youtube_prefers_mp4_streams() {
        let opts = DownloadOptions::for_platform(Platform::YouTube);
        assert!(opts.format.starts_with("bestvideo[height<=2160][ext=mp4]"));
        assert_eq!(opts.referer, "https://www.youtube.com/");
    }

    #[test]
    fn test_instagram_headers() {
        let opts = DownloadOptions::for_platform(Platform::Instagram);
        assert_eq!(opts.referer, "https://www.instagram.com/");
        assert!(opts.headers.iter().any(|(k, v)| k == "X-IG-App-ID" && v == "936619743392459"));

        let twitter = DownloadOptions::for_platform(Platform::Twitter);
        assert!(!twitter.headers.iter().any(|(k, _)| k == "X-IG-App-ID"));
    }

    #[test]
    fn test_to_args() {
        let args = DownloadOptions::for_platform(Platform::Twitter).to_args();
        let pos = args.iter().position(|a| a == "--referer").unwrap();
        assert_eq!(args[pos + 1], "https://twitter.com/");
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"--no-check-certificates".to_string()));
        assert!(args.iter().any(|a| a.starts_with("User-Agent:Mozilla/5.0")));
        let pos = args.iter().position(|a| a == "--merge-output-format").unwrap();
        assert_eq!(args[pos + 1], "mp4");
    }
}
