/// Download file naming: caption cleanup and `Content-Disposition` rendering.
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Name used when nothing printable survives cleanup.
pub const DEFAULT_FILENAME: &str = "youtube_video";

const MAX_FILENAME_CHARS: usize = 100;

static EXTENSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.[^.]+$").unwrap());

static RESERVED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());

static SPECIAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").unwrap());

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn is_pad(c: char) -> bool {
    c == ' ' || c == '_'
}

/// Turn a video caption or title into a filesystem-safe base name (no extension).
pub fn sanitize_filename(raw: &str) -> String {
    let name = EXTENSION_RE.replace(raw, "");
    let name = RESERVED_RE.replace_all(&name, "");
    let name = SPECIAL_RE.replace_all(&name, " ");
    let name = WHITESPACE_RE.replace_all(&name, " ");
    let name = name.trim_matches(is_pad);

    let name = if name.is_empty() { DEFAULT_FILENAME } else { name };

    let truncated: String = name.chars().take(MAX_FILENAME_CHARS).collect();
    let cleaned = truncated.trim_end_matches(is_pad).to_string();

    debug!("Sanitized filename {:?} -> {:?}", raw, cleaned);
    cleaned
}

/// Build an `attachment` disposition carrying both an ASCII fallback and the
/// RFC 5987 UTF-8 name.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '_' })
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"");

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        percent_encode(filename)
    )
}

/// Percent-encode everything outside RFC 5987 `attr-char`.
fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
