//! Content-type parsing and extension-based sniffing.

use std::path::Path;

/// A parsed `type/subtype; key=value` content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    essence: String,
    params: Vec<(String, String)>,
}

impl ContentType {
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(';');
        let essence = parts
            .next()
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let params = parts
            .filter_map(|p| {
                let (key, value) = p.split_once('=')?;
                Some((
                    key.trim().to_ascii_lowercase(),
                    value.trim().trim_matches('"').to_string(),
                ))
            })
            .collect();
        Self { essence, params }
    }

    /// The MIME type with all `;`-delimited parameters stripped.
    pub fn essence(&self) -> &str {
        &self.essence
    }

    /// Top-level type, e.g. `text` for `text/xml`.
    pub fn top_level(&self) -> &str {
        self.essence.split('/').next().unwrap_or("")
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn charset(&self) -> Option<&str> {
        self.param("charset")
    }
}

/// Guess a content type from a file's extension.
///
/// XML and plain text are pinned so that they always land on the text
/// builder; everything else defers to `mime_guess`.
pub fn guess_content_type(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())?;

    match ext.as_str() {
        "xml" => Some("text/xml"),
        "txt" => Some("text/plain"),
        _ => mime_guess::from_path(path).first_raw(),
    }
}
