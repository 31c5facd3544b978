//! File container URIs.
//!
//! Accepts `file://` URIs and plain paths. A trailing `/*` turns on
//! sub-directory traversal for a source URI, and sub-directory preservation
//! for a move destination.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use crate::utils::mask_credentials;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UriError {
    #[error("Empty file URI")]
    Empty,
    #[error("Unsupported URI scheme '{0}' (only file URIs are supported)")]
    UnsupportedScheme(String),
    #[error("Invalid file URI '{uri}': {reason}")]
    Invalid { uri: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUri {
    raw: String,
    path: PathBuf,
    recursive: bool,
}

impl FileUri {
    pub fn parse(raw: &str) -> Result<Self, UriError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(UriError::Empty);
        }

        let (base, recursive) = match trimmed
            .strip_suffix("/*")
            .or_else(|| trimmed.strip_suffix("\\*"))
        {
            Some(base) => (base, true),
            None => (trimmed, false),
        };

        let path = if base.starts_with("file:") || base.contains("://") {
            let url = Url::parse(base).map_err(|e| UriError::Invalid {
                uri: mask_credentials(raw),
                reason: e.to_string(),
            })?;
            if url.scheme() != "file" {
                return Err(UriError::UnsupportedScheme(url.scheme().to_string()));
            }
            url.to_file_path().map_err(|_| UriError::Invalid {
                uri: mask_credentials(raw),
                reason: "not a local path".to_string(),
            })?
        } else if base.is_empty() {
            PathBuf::from("/")
        } else {
            PathBuf::from(shellexpand::tilde(base).as_ref())
        };

        Ok(Self {
            raw: trimmed.to_string(),
            path,
            recursive,
        })
    }

    /// Anchor a relative path at `base` (the config file's directory).
    pub fn resolve_relative(mut self, base: &Path) -> Self {
        if self.path.is_relative() {
            self.path = base.join(&self.path);
        }
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sub-directory traversal (source) or preservation (destination).
    pub fn recursive(&self) -> bool {
        self.recursive
    }

    /// The URI as configured, safe for logs.
    pub fn masked(&self) -> String {
        mask_credentials(&self.raw)
    }
}

impl fmt::Display for FileUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}
