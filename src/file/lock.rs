//! Sidecar lock markers and fail records.
//!
//! A lock is `<name>.lock`, created with `create_new` so that exactly one
//! caller can win. Its content is `<token>:<node>:<created-ms>`. A fail record
//! is `<name>.fail` and holds the disposition that could not be applied.

use std::fmt;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{BREAK_SUFFIX, FAIL_SUFFIX, LOCK_SUFFIX};
use crate::work_queue::Clock;

const BREAK_MARKER_TTL: Duration = Duration::from_secs(5);
const BREAK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// `<target><suffix>` in the same directory as the target.
pub fn sidecar(target: &Path, suffix: &str) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    target.with_file_name(name)
}

pub fn lock_path(target: &Path) -> PathBuf {
    sidecar(target, LOCK_SUFFIX)
}

pub fn fail_path(target: &Path) -> PathBuf {
    sidecar(target, FAIL_SUFFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub token: String,
    pub node: String,
    pub created_ms: i64,
}

impl LockRecord {
    fn encode(&self) -> String {
        format!("{}:{}:{}", self.token, self.node, self.created_ms)
    }

    /// Node names may contain `:`, tokens and timestamps never do.
    pub fn parse(raw: &str) -> Option<Self> {
        let (rest, created) = raw.trim().rsplit_once(':')?;
        let (token, node) = rest.split_once(':')?;
        Some(Self {
            token: token.to_string(),
            node: node.to_string(),
            created_ms: created.parse().ok()?,
        })
    }
}

/// When a held lock may be broken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleasePolicy {
    pub enabled: bool,
    /// Minimum lock age before it is broken. `None` breaks regardless of age.
    pub max_age: Option<Duration>,
    /// Only break locks written by this node.
    pub same_node_only: bool,
}

impl ReleasePolicy {
    pub fn disabled() -> Self {
        Self::default()
    }
}

pub struct FileLocker {
    node: String,
    policy: ReleasePolicy,
    clock: Arc<dyn Clock>,
}

impl FileLocker {
    pub fn new(node: impl Into<String>, policy: ReleasePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            node: node.into(),
            policy,
            clock,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Try to take the lock. `Ok(None)` means another owner holds it.
    pub async fn acquire(&self, target: &Path) -> io::Result<Option<String>> {
        if let Some(token) = self.try_create(target).await? {
            return Ok(Some(token));
        }
        if self.policy.enabled && self.break_stale(target).await? {
            return self.try_create(target).await;
        }
        Ok(None)
    }

    async fn try_create(&self, target: &Path) -> io::Result<Option<String>> {
        let path = lock_path(target);
        let record = LockRecord {
            token: Uuid::new_v4().to_string(),
            node: self.node.clone(),
            created_ms: self.clock.now().timestamp_millis(),
        };

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e),
        };

        let written = async {
            file.write_all(record.encode().as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&path).await;
            return Err(e);
        }

        debug!("Locked {}", target.display());
        Ok(Some(record.token))
    }

    async fn lock_age_base(path: &Path) -> io::Result<Option<i64>> {
        let meta = fs::metadata(path).await?;
        Ok(meta
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t).timestamp_millis()))
    }

    /// Break the current lock if the policy allows it. Returns true if the
    /// lock is gone afterwards. Breakers and releasers are serialized by the
    /// break marker; while it is held the lock can only appear, never change
    /// owner, so the content read under the marker is the content removed.
    async fn break_stale(&self, target: &Path) -> io::Result<bool> {
        let path = lock_path(target);
        let Some(guard) = BreakGuard::try_take(&path).await? else {
            debug!("Lock on {} is already being broken", target.display());
            return Ok(false);
        };
        let broken = self.break_held(target, &path).await;
        guard.release().await;
        broken
    }

    async fn break_held(&self, target: &Path, path: &Path) -> io::Result<bool> {
        let observed = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e),
        };

        let (node, created_ms) = match LockRecord::parse(&observed) {
            Some(record) => (Some(record.node), Some(record.created_ms)),
            None => (None, Self::lock_age_base(path).await?),
        };

        if self.policy.same_node_only && node.as_deref() != Some(self.node.as_str()) {
            return Ok(false);
        }

        if let Some(max_age) = self.policy.max_age {
            let Some(created_ms) = created_ms else {
                return Ok(false);
            };
            let age_ms = self.clock.now().timestamp_millis() - created_ms;
            if age_ms < i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX) {
                return Ok(false);
            }
        }

        match fs::remove_file(path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        info!(
            "Released stale lock on {} held by {}",
            target.display(),
            node.as_deref().unwrap_or("unknown node")
        );
        Ok(true)
    }

    /// Remove the lock if it is still ours. Releasing an unlocked item is a no-op.
    pub async fn release(&self, target: &Path, token: &str) -> io::Result<()> {
        let path = lock_path(target);
        let guard = BreakGuard::take(&path).await?;
        let released = Self::release_held(target, &path, token).await;
        guard.release().await;
        released
    }

    async fn release_held(target: &Path, path: &Path, token: &str) -> io::Result<()> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        match LockRecord::parse(&content) {
            Some(record) if record.token == token => match fs::remove_file(path).await {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
                _ => {
                    debug!("Unlocked {}", target.display());
                    Ok(())
                }
            },
            _ => {
                warn!(
                    "Lock on {} was taken over by another owner, leaving it",
                    target.display()
                );
                Ok(())
            }
        }
    }

    pub async fn is_fail_marked(&self, target: &Path) -> bool {
        fs::metadata(fail_path(target)).await.is_ok()
    }

    pub async fn mark_failed(&self, target: &Path, record: &FailRecord) -> io::Result<()> {
        mark_failed(target, record).await
    }
}

/// Exclusive `<name>.lock.break` marker held while a lock is broken or
/// released.
struct BreakGuard {
    path: PathBuf,
}

impl BreakGuard {
    async fn try_take(lock: &Path) -> io::Result<Option<Self>> {
        let path = sidecar(lock, BREAK_SUFFIX);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => Ok(Some(Self { path })),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if Self::is_abandoned(&path).await {
                    warn!("Removing abandoned break marker {}", path.display());
                    let _ = fs::remove_file(&path).await;
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Wait for the marker. Holders keep it for a few file operations, so
    /// the wait is bounded by `BREAK_MARKER_TTL` even if a holder crashed.
    async fn take(lock: &Path) -> io::Result<Self> {
        loop {
            if let Some(guard) = Self::try_take(lock).await? {
                return Ok(guard);
            }
            tokio::time::sleep(BREAK_RETRY_INTERVAL).await;
        }
    }

    /// A marker older than the TTL belongs to a holder that died inside its
    /// critical section. Ages use the file system clock, not the locker's.
    async fn is_abandoned(path: &Path) -> bool {
        let Ok(modified) = fs::metadata(path).await.and_then(|m| m.modified()) else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .is_ok_and(|age| age > BREAK_MARKER_TTL)
    }

    async fn release(self) {
        if let Err(e) = fs::remove_file(&self.path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Could not remove break marker {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Disposition that could not be applied to an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailRecord {
    Move(PathBuf),
    Delete,
    /// Nothing to retry; the item waits for manual clearing.
    Unresolved,
}

impl fmt::Display for FailRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailRecord::Move(dest) => write!(f, "move:{}", dest.display()),
            FailRecord::Delete => f.write_str("delete"),
            FailRecord::Unresolved => f.write_str("unresolved"),
        }
    }
}

impl FailRecord {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.split_once(':') {
            Some(("move", dest)) if !dest.is_empty() => FailRecord::Move(PathBuf::from(dest)),
            _ if raw == "delete" => FailRecord::Delete,
            _ => FailRecord::Unresolved,
        }
    }
}

pub async fn mark_failed(target: &Path, record: &FailRecord) -> io::Result<()> {
    fs::write(fail_path(target), record.to_string()).await?;
    warn!("Marked {} as failed ({})", target.display(), record);
    Ok(())
}

pub async fn read_fail_record(target: &Path) -> io::Result<Option<FailRecord>> {
    match fs::read_to_string(fail_path(target)).await {
        Ok(content) => Ok(Some(FailRecord::parse(&content))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove the fail record. Returns false if there was none.
pub async fn clear_fail_record(target: &Path) -> io::Result<bool> {
    match fs::remove_file(fail_path(target)).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work_queue::{ManualClock, SystemClock};
    use tempfile::tempdir;

    fn locker(node: &str, policy: ReleasePolicy, clock: Arc<dyn Clock>) -> FileLocker {
        FileLocker::new(node, policy, clock)
    }

    #[test]
    fn test_record_parse_allows_colons_in_node() {
        let record = LockRecord::parse("abc:host:10.0.0.1:1700000000000").unwrap();
        assert_eq!(record.token, "abc");
        assert_eq!(record.node, "host:10.0.0.1");
        assert_eq!(record.created_ms, 1_700_000_000_000);
        assert!(LockRecord::parse("garbage").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_one_winner() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.txt");
        std::fs::write(&target, "x").unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let target = target.clone();
            let l = locker(
                &format!("node-{}", i),
                ReleasePolicy::disabled(),
                Arc::new(SystemClock),
            );
            tasks.push(tokio::spawn(async move { l.acquire(&target).await.unwrap() }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_release_is_idempotent_and_token_checked() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.txt");
        let l = locker("n1", ReleasePolicy::disabled(), Arc::new(SystemClock));

        let token = l.acquire(&target).await.unwrap().unwrap();
        assert!(l.acquire(&target).await.unwrap().is_none());

        l.release(&target, "not-the-token").await.unwrap();
        assert!(lock_path(&target).exists());

        l.release(&target, &token).await.unwrap();
        assert!(!lock_path(&target).exists());
        l.release(&target, &token).await.unwrap();
    }

    #[tokio::test]
    async fn test_auto_release_after_max_age() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.txt");
        let clock = ManualClock::new(Utc::now());
        let policy = ReleasePolicy {
            enabled: true,
            max_age: Some(Duration::from_secs(60)),
            same_node_only: true,
        };
        let crashed = locker("n1", policy.clone(), Arc::new(clock.clone()));
        let restarted = locker("n1", policy, Arc::new(clock.clone()));

        crashed.acquire(&target).await.unwrap().unwrap();
        clock.advance(Duration::from_secs(30));
        assert!(restarted.acquire(&target).await.unwrap().is_none());

        clock.advance(Duration::from_secs(31));
        assert!(restarted.acquire(&target).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_breaking_a_stale_lock_has_one_winner() {
        let breaker_policy = ReleasePolicy {
            enabled: true,
            max_age: Some(Duration::from_secs(60)),
            same_node_only: false,
        };

        for round in 0..50 {
            let dir = tempdir().unwrap();
            let target = dir.path().join("a.txt");
            std::fs::write(&target, "x").unwrap();
            let stale = Utc::now().timestamp_millis() - 3_600_000;
            std::fs::write(lock_path(&target), format!("old:crashed:{}", stale)).unwrap();

            let mut tasks = Vec::new();
            for i in 0..12 {
                let target = target.clone();
                let policy = if i % 2 == 0 {
                    breaker_policy.clone()
                } else {
                    ReleasePolicy::disabled()
                };
                let l = locker(&format!("node-{}", i), policy, Arc::new(SystemClock));
                tasks.push(tokio::spawn(async move { l.acquire(&target).await.unwrap() }));
            }

            let mut tokens = Vec::new();
            for task in tasks {
                if let Some(token) = task.await.unwrap() {
                    tokens.push(token);
                }
            }
            assert_eq!(tokens.len(), 1, "round {} had {} owners", round, tokens.len());

            let content = std::fs::read_to_string(lock_path(&target)).unwrap();
            assert_eq!(LockRecord::parse(&content).unwrap().token, tokens[0]);
            assert!(!sidecar(&lock_path(&target), BREAK_SUFFIX).exists());
        }
    }

    #[tokio::test]
    async fn test_release_waits_for_break_marker() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.txt");
        let l = Arc::new(locker("n1", ReleasePolicy::disabled(), Arc::new(SystemClock)));
        let token = l.acquire(&target).await.unwrap().unwrap();

        let guard = BreakGuard::try_take(&lock_path(&target)).await.unwrap().unwrap();
        assert!(BreakGuard::try_take(&lock_path(&target)).await.unwrap().is_none());

        let releasing = {
            let (l, target) = (l.clone(), target.clone());
            tokio::spawn(async move { l.release(&target, &token).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(lock_path(&target).exists());

        guard.release().await;
        releasing.await.unwrap().unwrap();
        assert!(!lock_path(&target).exists());
    }

    #[tokio::test]
    async fn test_same_node_policy_protects_other_nodes() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.txt");
        let clock = ManualClock::new(Utc::now());
        let policy = ReleasePolicy {
            enabled: true,
            max_age: Some(Duration::from_secs(1)),
            same_node_only: true,
        };
        let other = locker("n2", policy.clone(), Arc::new(clock.clone()));
        let me = locker("n1", policy, Arc::new(clock.clone()));

        other.acquire(&target).await.unwrap().unwrap();
        clock.advance(Duration::from_secs(3600));
        assert!(me.acquire(&target).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_record_roundtrip_and_clear() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.txt");
        let l = locker("n1", ReleasePolicy::disabled(), Arc::new(SystemClock));

        assert!(!l.is_fail_marked(&target).await);
        l.mark_failed(&target, &FailRecord::Move(PathBuf::from("/out/a.txt")))
            .await
            .unwrap();
        assert!(l.is_fail_marked(&target).await);
        assert_eq!(
            read_fail_record(&target).await.unwrap(),
            Some(FailRecord::Move(PathBuf::from("/out/a.txt")))
        );

        assert!(clear_fail_record(&target).await.unwrap());
        assert!(!clear_fail_record(&target).await.unwrap());
        assert_eq!(read_fail_record(&target).await.unwrap(), None);
    }
}
