/// Data types shared across the vidfetch crates.
use serde::{Deserialize, Serialize};

/// The subset of yt-dlp's `--dump-single-json` output we care about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub formats: Vec<FormatInfo>,
}

/// Some extractors report `"formats": null`.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<FormatInfo>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<FormatInfo>>::deserialize(deserializer)?.unwrap_or_default())
}

impl VideoInfo {
    /// Text used to name the downloaded file: description, then caption,
    /// then title, skipping empty values.
    pub fn raw_caption(&self, video_id: &str) -> String {
        [&self.description, &self.caption, &self.title]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| format!("video_{}", video_id))
    }
}

/// One entry of the `formats` array.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FormatInfo {
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub tbr: Option<f64>,
}

/// yt-dlp occasionally reports byte counts as floats.
fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let number = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(number.and_then(|n| n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))))
}

/// Progress report parsed from a yt-dlp stdout line.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProgressUpdate {
    pub status: String,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub speed: Option<f64>,
    pub eta_seconds: Option<u64>,
    pub percent: Option<f64>,
}

/// Events emitted while a fetch is running.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FetchEvent {
    /// Metadata extracted, download about to start.
    Started {
        video_id: String,
        title: Option<String>,
        filename: String,
    },
    Progress(ProgressUpdate),
}

/// Issue report as submitted by the browser. Fields may be any JSON value;
/// non-string values are stored as their JSON text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueReport {
    #[serde(rename = "type", default)]
    pub issue_type: Option<serde_json::Value>,
    #[serde(default)]
    pub url: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<serde_json::Value>,
}

/// Issue as persisted to the issues directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub issue_type: String,
    pub url: String,
    pub description: String,
    pub status: String,
}
