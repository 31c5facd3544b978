//! A file discovered in a polled container.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use super::{
    HEADER_FILE_LENGTH, HEADER_FILE_NAME, HEADER_FILE_PATH, HEADER_FILE_URI,
    HEADER_LAST_MODIFIED, HEADER_RELATIVE_PATH,
};
use crate::work_queue::{Headers, Payload};

#[derive(Debug, Clone, PartialEq)]
pub struct FileItem {
    pub path: PathBuf,
    pub name: String,
    /// Directory relative to the container root, when traversal is enabled.
    pub relative_dir: Option<PathBuf>,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub fail_marked: bool,
    pub content_type: Option<String>,
}

impl FileItem {
    pub fn new(path: &Path, size: u64, modified: DateTime<Utc>) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            name,
            relative_dir: None,
            size,
            modified,
            fail_marked: false,
            content_type: None,
        }
    }

    fn uri(&self) -> String {
        Url::from_file_path(&self.path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| self.path.display().to_string())
    }
}

#[async_trait]
impl Payload for FileItem {
    fn id(&self) -> String {
        self.path.display().to_string()
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn content_type(&self) -> Option<String> {
        self.content_type.clone()
    }

    fn headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert(HEADER_FILE_PATH.to_string(), self.path.display().to_string());
        headers.insert(HEADER_FILE_NAME.to_string(), self.name.clone());
        headers.insert(HEADER_FILE_URI.to_string(), self.uri());
        headers.insert(HEADER_FILE_LENGTH.to_string(), self.size.to_string());
        headers.insert(
            HEADER_LAST_MODIFIED.to_string(),
            self.modified.timestamp_millis().to_string(),
        );
        if let Some(ref rel) = self.relative_dir {
            headers.insert(HEADER_RELATIVE_PATH.to_string(), rel.display().to_string());
        }
        headers
    }

    async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }

    fn is_fail_marked(&self) -> bool {
        self.fail_marked
    }
}
