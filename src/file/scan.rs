//! Directory enumeration: filtering, readiness and ordering.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::item::FileItem;
use super::{BREAK_SUFFIX, FAIL_SUFFIX, LOCK_SUFFIX};
use crate::utils::guess_content_type;
use crate::work_queue::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Name,
    Size,
    LastModified,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub order: SortOrder,
}

#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    name: String,
    is_dir: bool,
    size: u64,
    modified: DateTime<Utc>,
}

fn by_name(a: &Entry, b: &Entry) -> Ordering {
    a.name.cmp(&b.name)
}

fn by_size(a: &Entry, b: &Entry) -> Ordering {
    a.size.cmp(&b.size)
}

fn by_last_modified(a: &Entry, b: &Entry) -> Ordering {
    a.modified.cmp(&b.modified)
}

fn comparator(key: SortKey) -> fn(&Entry, &Entry) -> Ordering {
    match key {
        SortKey::Name => by_name,
        SortKey::Size => by_size,
        SortKey::LastModified => by_last_modified,
    }
}

fn sort_entries(entries: &mut [Entry], spec: SortSpec) {
    let cmp = comparator(spec.key);
    match spec.order {
        SortOrder::Ascending => entries.sort_by(cmp),
        SortOrder::Descending => entries.sort_by(|a, b| cmp(b, a)),
    }
}

/// Lock markers, fail records and break markers never become items.
pub fn is_marker(name: &str) -> bool {
    name.ends_with(LOCK_SUFFIX) || name.ends_with(FAIL_SUFFIX) || name.ends_with(BREAK_SUFFIX)
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Matched against the whole file name.
    pub pattern: Option<Regex>,
    pub sort: Option<SortSpec>,
    pub recursive: bool,
    /// Files younger than this are not ready yet.
    pub min_age: Option<Duration>,
    /// Yield fail-marked files (flagged) instead of hiding them.
    pub include_fail_marked: bool,
}

impl ScanOptions {
    /// Compile a name pattern so that it must match the entire file name.
    pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
        Regex::new(&format!("^(?:{})$", pattern))
    }
}

#[derive(Clone)]
pub struct DirectoryScanner {
    options: ScanOptions,
    clock: Arc<dyn Clock>,
}

impl DirectoryScanner {
    pub fn new(options: ScanOptions, clock: Arc<dyn Clock>) -> Self {
        Self { options, clock }
    }

    /// List ready items under `root`, in processing order.
    pub async fn scan(&self, root: &Path) -> io::Result<Vec<FileItem>> {
        let options = self.options.clone();
        let now = self.clock.now();
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut items = Vec::new();
            scan_dir(&root, None, &options, now, &mut items)?;
            Ok(items)
        })
        .await
        .map_err(|e| io::Error::new(ErrorKind::Other, e))?
    }

    /// Inspect a container URI that points at a single file. Returns `None`
    /// if the file is a marker, fail-marked (and hidden) or not ready yet.
    pub async fn inspect_file(&self, path: &Path) -> io::Result<Option<FileItem>> {
        let meta = tokio::fs::metadata(path).await?;
        let mut item = FileItem::new(path, meta.len(), modified_of(&meta));
        if is_marker(&item.name) {
            return Ok(None);
        }
        item.fail_marked = tokio::fs::metadata(super::lock::fail_path(path))
            .await
            .is_ok();
        item.content_type = guess_content_type(path).map(str::to_string);
        Ok(accept(item, &self.options, self.clock.now()))
    }
}

fn modified_of(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
}

fn is_ready(modified: DateTime<Utc>, now: DateTime<Utc>, min_age: Option<Duration>) -> bool {
    match min_age {
        None => true,
        Some(min_age) => (now - modified)
            .to_std()
            .map_or(false, |age| age >= min_age),
    }
}

/// Apply fail-mark and readiness filters to a candidate.
fn accept(item: FileItem, options: &ScanOptions, now: DateTime<Utc>) -> Option<FileItem> {
    if item.fail_marked && !options.include_fail_marked {
        debug!("{} has a fail record, skipping", item.path.display());
        return None;
    }
    if !is_ready(item.modified, now, options.min_age) {
        debug!("{} is not ready to be read yet", item.path.display());
        return None;
    }
    Some(item)
}

fn scan_dir(
    dir: &Path,
    relative: Option<&Path>,
    options: &ScanOptions,
    now: DateTime<Utc>,
    out: &mut Vec<FileItem>,
) -> io::Result<()> {
    let mut names = HashSet::new();
    let mut entries = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        names.insert(name.clone());

        let path = entry.path();
        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            // Taken by another consumer while listing.
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                warn!("Cannot stat {}: {}", path.display(), e);
                continue;
            }
        };
        entries.push(Entry {
            path,
            name,
            is_dir: meta.is_dir(),
            size: meta.len(),
            modified: modified_of(&meta),
        });
    }

    if let Some(spec) = options.sort {
        sort_entries(&mut entries, spec);
    }

    for entry in entries {
        if entry.is_dir {
            if options.recursive {
                let child_rel = match relative {
                    Some(rel) => rel.join(&entry.name),
                    None => PathBuf::from(&entry.name),
                };
                if let Err(e) = scan_dir(&entry.path, Some(&child_rel), options, now, out) {
                    warn!("Cannot list {}: {}", entry.path.display(), e);
                }
            }
            continue;
        }

        if is_marker(&entry.name) {
            continue;
        }
        if let Some(ref pattern) = options.pattern {
            if !pattern.is_match(&entry.name) {
                continue;
            }
        }

        let mut item = FileItem::new(&entry.path, entry.size, entry.modified);
        item.relative_dir = relative.map(Path::to_path_buf);
        item.fail_marked = names.contains(&format!("{}{}", entry.name, FAIL_SUFFIX));
        item.content_type = guess_content_type(&entry.path).map(str::to_string);

        if let Some(item) = accept(item, options, now) {
            out.push(item);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work_queue::{ManualClock, SystemClock};
    use tempfile::tempdir;

    fn names(items: &[FileItem]) -> Vec<String> {
        items.iter().map(|i| i.name.clone()).collect()
    }

    fn scanner(options: ScanOptions) -> DirectoryScanner {
        DirectoryScanner::new(options, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_sort_by_size_ascending() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "12345").unwrap();
        std::fs::write(dir.path().join("b.txt"), "12").unwrap();

        let options = ScanOptions {
            sort: Some(SortSpec {
                key: SortKey::Size,
                order: SortOrder::Ascending,
            }),
            ..Default::default()
        };
        let items = scanner(options).scan(dir.path()).await.unwrap();
        assert_eq!(names(&items), vec!["b.txt", "a.txt"]);
    }

    #[tokio::test]
    async fn test_sort_by_name_descending() {
        let dir = tempdir().unwrap();
        for name in ["b.txt", "c.txt", "a.txt"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let options = ScanOptions {
            sort: Some(SortSpec {
                key: SortKey::Name,
                order: SortOrder::Descending,
            }),
            ..Default::default()
        };
        let items = scanner(options).scan(dir.path()).await.unwrap();
        assert_eq!(names(&items), vec!["c.txt", "b.txt", "a.txt"]);
    }

    #[tokio::test]
    async fn test_markers_and_pattern_filtered() {
        let dir = tempdir().unwrap();
        for name in ["a.xml", "a.xml.lock", "b.xml", "b.xml.fail", "c.txt", "d.xml.bak"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let options = ScanOptions {
            pattern: Some(ScanOptions::compile_pattern(r".*\.xml").unwrap()),
            sort: Some(SortSpec {
                key: SortKey::Name,
                order: SortOrder::Ascending,
            }),
            ..Default::default()
        };
        let items = scanner(options.clone()).scan(dir.path()).await.unwrap();
        assert_eq!(names(&items), vec!["a.xml"]);

        let with_failed = ScanOptions {
            include_fail_marked: true,
            ..options
        };
        let items = scanner(with_failed).scan(dir.path()).await.unwrap();
        assert_eq!(names(&items), vec!["a.xml", "b.xml"]);
        assert!(items[1].fail_marked);
    }

    #[tokio::test]
    async fn test_recursion_records_relative_dir() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("x/y")).unwrap();
        std::fs::write(dir.path().join("top.txt"), "x").unwrap();
        std::fs::write(dir.path().join("x/y/deep.txt"), "x").unwrap();

        let flat = scanner(ScanOptions::default()).scan(dir.path()).await.unwrap();
        assert_eq!(names(&flat), vec!["top.txt"]);

        let options = ScanOptions {
            recursive: true,
            sort: Some(SortSpec {
                key: SortKey::Name,
                order: SortOrder::Ascending,
            }),
            ..Default::default()
        };
        let items = scanner(options).scan(dir.path()).await.unwrap();
        assert_eq!(names(&items), vec!["top.txt", "deep.txt"]);
        assert_eq!(items[0].relative_dir, None);
        assert_eq!(items[1].relative_dir, Some(PathBuf::from("x/y")));
    }

    #[tokio::test]
    async fn test_min_age_readiness() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("fresh.txt"), "x").unwrap();
        let clock = ManualClock::new(Utc::now());
        let options = ScanOptions {
            min_age: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let scanner = DirectoryScanner::new(options, Arc::new(clock.clone()));

        assert!(scanner.scan(dir.path()).await.unwrap().is_empty());
        clock.advance(Duration::from_secs(120));
        assert_eq!(scanner.scan(dir.path()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let result = scanner(ScanOptions::default())
            .scan(&dir.path().join("missing"))
            .await;
        assert!(result.is_err());
    }
}
