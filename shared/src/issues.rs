/// User issue reports, stored as one JSON file per report.
use chrono::Local;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::errors::IssueError;
use crate::models::{Issue, IssueReport};

#[derive(Debug, Clone)]
pub struct IssueStore {
    dir: PathBuf,
}

impl IssueStore {
    /// Open the store, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, IssueError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Validate and persist a report. Returns the stored issue.
    pub fn report(&self, report: IssueReport) -> Result<Issue, IssueError> {
        let issue_type = required(report.issue_type, "type")?;
        let url = required(report.url, "url")?;
        let description = required(report.description, "description")?;

        let now = Local::now();
        let base_id = now.format("%Y%m%d%H%M%S").to_string();

        let mut issue = Issue {
            id: base_id.clone(),
            timestamp: now.to_rfc3339(),
            issue_type,
            url,
            description,
            status: "new".to_string(),
        };

        // Same-second reports get a numeric suffix instead of overwriting.
        let mut attempt = 1;
        let mut file = loop {
            let path = self.dir.join(format!("issue_{}.json", issue.id));
            match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                    issue.id = format!("{}_{}", base_id, attempt);
                }
                Err(e) => return Err(e.into()),
            }
        };

        serde_json::to_writer_pretty(&mut file, &issue)?;
        file.write_all(b"\n")?;

        info!("New issue reported: {}", issue.id);
        Ok(issue)
    }
}

/// Accept any truthy value: a non-blank string, a non-zero number, `true`,
/// or a non-empty array or object.
fn required(value: Option<Value>, field: &'static str) -> Result<String, IssueError> {
    let present = match &value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    };
    match value {
        Some(Value::String(s)) if present => Ok(s),
        Some(other) if present => Ok(other.to_string()),
        _ => Err(IssueError::MissingField(field)),
    }
}
