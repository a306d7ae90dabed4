/// Helpers for the ffmpeg/ffprobe binaries yt-dlp needs for merging.
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info, warn};

const WINDOWS_FFMPEG_DIRS: &[&str] = &[r"C:\ffmpeg\bin", r"C:\Program Files\ffmpeg\bin"];

const UNIX_FFMPEG_DIRS: &[&str] = &[
    "/usr/local/bin",
    "/snap/bin",
    "/opt/homebrew/bin",
    "/home/linuxbrew/.linuxbrew/bin",
];

/// Discover extra PATH entries needed for tools like ffmpeg.
/// The explicit override comes first, then common install locations.
pub fn discover_extra_paths(ffmpeg_path: Option<&Path>) -> Vec<PathBuf> {
    let mut extra = Vec::new();

    if let Some(path) = ffmpeg_path {
        extra.push(path.to_path_buf());
    }

    let (candidates, binary) = if cfg!(target_os = "windows") {
        (WINDOWS_FFMPEG_DIRS, "ffmpeg.exe")
    } else {
        (UNIX_FFMPEG_DIRS, "ffmpeg")
    };

    for dir in candidates {
        let dir = PathBuf::from(dir);
        if dir.join(binary).exists() && !extra.contains(&dir) {
            extra.push(dir);
        }
    }

    extra
}

/// Append `extra` to the current PATH.
pub fn augmented_path(extra: &[PathBuf]) -> Option<std::ffi::OsString> {
    if extra.is_empty() {
        return None;
    }
    let current = std::env::var_os("PATH").unwrap_or_default();
    let paths = std::env::split_paths(&current).chain(extra.iter().cloned());
    match std::env::join_paths(paths) {
        Ok(joined) => Some(joined),
        Err(e) => {
            warn!("Could not extend PATH with {:?}: {}", extra, e);
            None
        }
    }
}

/// Check that ffmpeg runs (`ffmpeg -version` exits 0).
pub async fn check_ffmpeg(ffmpeg_bin: &str, extra_paths: &[PathBuf]) -> bool {
    let mut cmd = Command::new(ffmpeg_bin);
    cmd.arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(path) = augmented_path(extra_paths) {
        cmd.env("PATH", path);
    }

    match cmd.status().await {
        Ok(status) if status.success() => true,
        Ok(status) => {
            error!("ffmpeg check failed ({}): {}", ffmpeg_bin, status);
            false
        }
        Err(e) => {
            error!("ffmpeg not found ({}): {}. Please ensure ffmpeg is installed on the system.", ffmpeg_bin, e);
            false
        }
    }
}

/// Ask ffprobe whether `file` carries an audio stream.
///
/// `None` means ffprobe itself could not be run.
pub async fn has_audio_stream(ffprobe_bin: &str, file: &Path) -> Option<bool> {
    let output = Command::new(ffprobe_bin)
        .args(["-v", "quiet", "-show_streams", "-select_streams", "a"])
        .arg(file)
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            let has_audio = !String::from_utf8_lossy(&out.stdout).trim().is_empty();
            if has_audio {
                info!("Audio stream detected in {}", file.display());
            } else {
                warn!("No audio stream detected in {}", file.display());
            }
            Some(has_audio)
        }
        Ok(out) => {
            warn!("ffprobe exited with {} for {}", out.status, file.display());
            Some(false)
        }
        Err(e) => {
            warn!("Could not verify audio stream: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_comes_first() {
        let paths = discover_extra_paths(Some(Path::new("/opt/ffmpeg/bin")));
        assert_eq!(paths[0], PathBuf::from("/opt/ffmpeg/bin"));
    }

    #[test]
    fn test_augmented_path_empty() {
        assert!(augmented_path(&[]).is_none());
    }

    #[test]
    fn test_augmented_path_appends() {
        let joined = augmented_path(&[PathBuf::from("/opt/vidfetch-test")]).unwrap();
        let parts: Vec<PathBuf> = std::env::split_paths(&joined).collect();
        assert_eq!(parts.last(), Some(&PathBuf::from("/opt/vidfetch-test")));
    }

    #[tokio::test]
    async fn test_missing_ffmpeg() {
        assert!(!check_ffmpeg("/nonexistent/vidfetch/ffmpeg", &[]).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_working_ffmpeg() {
        // `true` ignores its arguments and exits 0.
        assert!(check_ffmpeg("true", &[]).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ffprobe_without_output_means_no_audio() {
        assert_eq!(has_audio_stream("true", Path::new("/tmp/none.mp4")).await, Some(false));
        assert_eq!(has_audio_stream("/nonexistent/ffprobe", Path::new("x")).await, None);
    }
}
