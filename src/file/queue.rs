//! File-backed work queue: lock markers for claims, moves and deletes for
//! finalization.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::item::FileItem;
use super::lock::{clear_fail_record, mark_failed, read_fail_record, FailRecord, FileLocker};
use super::scan::DirectoryScanner;
use super::uri::FileUri;
use super::CONTAINER_LOCK_STEM;
use crate::work_queue::{
    ClaimId, Connect, Enumeration, FinalAction, Payload, RetryingConnector, WorkHandle,
    WorkQueue, WorkQueueError,
};

#[cfg(unix)]
const EXDEV: i32 = 18;
#[cfg(windows)]
const EXDEV: i32 = 17;
#[cfg(not(any(unix, windows)))]
const EXDEV: i32 = -1;

/// What the container URI resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Container {
    Directory(PathBuf),
    File(PathBuf),
}

/// Resolves the container path; retried by `RetryingConnector`.
pub struct ContainerConnector {
    uri: FileUri,
}

impl ContainerConnector {
    pub fn new(uri: FileUri) -> Self {
        Self { uri }
    }
}

#[async_trait]
impl Connect for ContainerConnector {
    type Handle = Container;
    type Error = io::Error;

    async fn connect(&self) -> io::Result<Container> {
        let path = self.uri.path().to_path_buf();
        let meta = fs::metadata(&path).await?;
        Ok(if meta.is_dir() {
            Container::Directory(path)
        } else {
            Container::File(path)
        })
    }

    fn describe(&self) -> String {
        self.uri.masked()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileQueueSettings {
    pub locking: bool,
    pub force_create_folder: bool,
    /// `Some(true)` stamps moved files with the move time, `Some(false)`
    /// keeps the source timestamp.
    pub update_last_modified: Option<bool>,
    /// Overrides the sniffed content type.
    pub content_type: Option<String>,
    /// Configured move destinations.
    pub move_roots: Vec<PathBuf>,
}

pub struct FileQueue {
    endpoint: String,
    connector: RetryingConnector<ContainerConnector>,
    scanner: DirectoryScanner,
    locker: FileLocker,
    container_locker: Option<FileLocker>,
    settings: FileQueueSettings,
    cancel: CancellationToken,
    container: Option<Container>,
    container_token: Option<String>,
}

impl FileQueue {
    pub fn new(
        endpoint: impl Into<String>,
        connector: RetryingConnector<ContainerConnector>,
        scanner: DirectoryScanner,
        locker: FileLocker,
        settings: FileQueueSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            connector,
            scanner,
            locker,
            container_locker: None,
            settings,
            cancel,
            container: None,
            container_token: None,
        }
    }

    /// Hold a container-level lock for the duration of each cycle so that
    /// only one node polls the directory at a time.
    pub fn with_container_lock(mut self, locker: FileLocker) -> Self {
        self.container_locker = Some(locker);
        self
    }

    fn apply_content_type(&self, mut item: FileItem) -> FileItem {
        if let Some(ref ct) = self.settings.content_type {
            item.content_type = Some(ct.clone());
        }
        item
    }

    fn under_move_root(&self, dir: &Path) -> bool {
        self.settings
            .move_roots
            .iter()
            .any(|root| dir.starts_with(root) && root.is_dir())
    }

    async fn ensure_parent(&self, destination: &Path) -> io::Result<()> {
        let Some(parent) = destination.parent() else {
            return Ok(());
        };
        if fs::metadata(parent).await.is_ok() {
            return Ok(());
        }
        if self.settings.force_create_folder || self.under_move_root(parent) {
            fs::create_dir_all(parent).await
        } else {
            Err(io::Error::new(
                ErrorKind::NotFound,
                format!("destination folder {} does not exist", parent.display()),
            ))
        }
    }

    async fn move_file(&self, source: &Path, destination: &Path) -> io::Result<()> {
        self.ensure_parent(destination).await?;
        let source_modified = fs::metadata(source).await?.modified().ok();

        match fs::rename(source, destination).await {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(EXDEV) => {
                fs::copy(source, destination).await?;
                fs::remove_file(source).await?;
            }
            Err(e) => return Err(e),
        }

        let stamp = match self.settings.update_last_modified {
            Some(true) => Some(SystemTime::now()),
            Some(false) => source_modified,
            None => None,
        };
        if let Some(when) = stamp {
            if let Err(e) = set_modified(destination, when).await {
                warn!(
                    "{}: moved {} but could not set its timestamp: {}",
                    self.endpoint,
                    destination.display(),
                    e
                );
            }
        }

        info!(
            "{}: moved {} to {}",
            self.endpoint,
            source.display(),
            destination.display()
        );
        Ok(())
    }

    async fn apply(&self, item: &FileItem, action: &FinalAction) -> io::Result<()> {
        match action {
            FinalAction::MoveToSuccess { destination }
            | FinalAction::MoveToFailure { destination } => {
                self.move_file(&item.path, destination).await
            }
            FinalAction::Delete => match fs::remove_file(&item.path).await {
                Ok(()) => {
                    debug!("{}: deleted {}", self.endpoint, item.path.display());
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(
                        "{}: {} was already gone when deleting",
                        self.endpoint,
                        item.path.display()
                    );
                    Ok(())
                }
                Err(e) => Err(e),
            },
            FinalAction::MarkFailed => mark_failed(&item.path, &FailRecord::Unresolved).await,
            FinalAction::LeaveInPlace => Ok(()),
            other => Err(io::Error::new(
                ErrorKind::Unsupported,
                format!("{:?} is not applicable to files", other),
            )),
        }
    }

    async fn release_claim(&self, claim: ClaimId) {
        if let ClaimId::LockMarker { path, token } = claim {
            if let Err(e) = self.locker.release(&path, &token).await {
                warn!("{}: could not unlock {}: {}", self.endpoint, path.display(), e);
            }
        }
    }
}

async fn set_modified(path: &Path, when: SystemTime) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)?
            .set_modified(when)
    })
    .await
    .map_err(|e| io::Error::new(ErrorKind::Other, e))?
}

fn fail_record_for(action: &FinalAction) -> FailRecord {
    match action {
        FinalAction::MoveToSuccess { destination } | FinalAction::MoveToFailure { destination } => {
            FailRecord::Move(destination.clone())
        }
        FinalAction::Delete => FailRecord::Delete,
        _ => FailRecord::Unresolved,
    }
}

fn action_for(record: FailRecord) -> Option<FinalAction> {
    match record {
        FailRecord::Move(destination) => Some(FinalAction::MoveToFailure { destination }),
        FailRecord::Delete => Some(FinalAction::Delete),
        FailRecord::Unresolved => None,
    }
}

#[async_trait]
impl WorkQueue for FileQueue {
    type Item = FileItem;

    async fn open(&mut self) -> Result<(), WorkQueueError> {
        let container = self.connector.connect(&self.cancel).await?;

        if let (Container::Directory(dir), Some(locker)) = (&container, &self.container_locker) {
            match locker.acquire(&dir.join(CONTAINER_LOCK_STEM)).await? {
                Some(token) => self.container_token = Some(token),
                None => return Err(WorkQueueError::ContainerBusy(self.connector.target())),
            }
        }

        self.container = Some(container);
        Ok(())
    }

    async fn enumerate(&mut self) -> Result<Enumeration<FileItem>, WorkQueueError> {
        let listing = match self.container {
            None => Enumeration::Unavailable {
                reason: "container not opened".to_string(),
            },
            Some(Container::File(ref path)) => match self.scanner.inspect_file(path).await {
                Ok(Some(item)) => Enumeration::Single(self.apply_content_type(item)),
                Ok(None) => Enumeration::Container(Vec::new()),
                Err(e) => Enumeration::Unavailable {
                    reason: e.to_string(),
                },
            },
            Some(Container::Directory(ref dir)) => match self.scanner.scan(dir).await {
                Ok(items) => Enumeration::Container(
                    items
                        .into_iter()
                        .map(|item| self.apply_content_type(item))
                        .collect(),
                ),
                Err(e) => Enumeration::Unavailable {
                    reason: format!("{}: {}", self.connector.target(), e),
                },
            },
        };
        Ok(listing)
    }

    async fn claim(&self, item: FileItem) -> Result<WorkHandle<FileItem>, WorkQueueError> {
        let label = item.id();

        if !self.settings.locking {
            if fs::metadata(&item.path).await.is_err() {
                return Err(WorkQueueError::NotFound(label));
            }
            return Ok(WorkHandle::new(item, ClaimId::Unlocked, label));
        }

        let token = self
            .locker
            .acquire(&item.path)
            .await?
            .ok_or(WorkQueueError::AlreadyClaimed)?;

        // Listed, then taken and finalized by another node before our lock.
        if fs::metadata(&item.path).await.is_err() {
            if let Err(e) = self.locker.release(&item.path, &token).await {
                warn!("{}: could not unlock {}: {}", self.endpoint, label, e);
            }
            return Err(WorkQueueError::NotFound(label));
        }

        let claim = ClaimId::LockMarker {
            path: item.path.clone(),
            token,
        };
        Ok(WorkHandle::new(item, claim, label))
    }

    async fn finalize(
        &self,
        handle: WorkHandle<FileItem>,
        action: FinalAction,
    ) -> Result<(), WorkQueueError> {
        let (item, claim) = handle.consume();

        let result = match self.apply(&item, &action).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if action != FinalAction::MarkFailed {
                    if let Err(mark_err) = mark_failed(&item.path, &fail_record_for(&action)).await
                    {
                        error!(
                            "{}: could not record failure for {}: {}",
                            self.endpoint,
                            item.path.display(),
                            mark_err
                        );
                    }
                }
                Err(WorkQueueError::finalization(item.id(), e))
            }
        };

        self.release_claim(claim).await;
        result
    }

    async fn release(&self, handle: WorkHandle<FileItem>) -> Result<(), WorkQueueError> {
        let (_, claim) = handle.consume();
        self.release_claim(claim).await;
        Ok(())
    }

    async fn recover_failed(&self, item: FileItem) -> Result<bool, WorkQueueError> {
        let Some(action) = read_fail_record(&item.path).await?.and_then(action_for) else {
            return Ok(false);
        };

        let token = if self.settings.locking {
            match self.locker.acquire(&item.path).await? {
                Some(token) => Some(token),
                None => return Ok(false),
            }
        } else {
            None
        };

        let result = self.apply(&item, &action).await;
        if let Some(token) = token {
            if let Err(e) = self.locker.release(&item.path, &token).await {
                warn!("{}: could not unlock {}: {}", self.endpoint, item.id(), e);
            }
        }

        match result {
            Ok(()) => {
                clear_fail_record(&item.path).await?;
                info!(
                    "{}: applied recorded disposition for {}",
                    self.endpoint,
                    item.path.display()
                );
                Ok(true)
            }
            Err(e) => Err(WorkQueueError::finalization(item.id(), e)),
        }
    }

    async fn close(&mut self) {
        if let (Some(Container::Directory(dir)), Some(token)) =
            (self.container.take(), self.container_token.take())
        {
            if let Some(ref locker) = self.container_locker {
                if let Err(e) = locker.release(&dir.join(CONTAINER_LOCK_STEM), &token).await {
                    warn!("{}: could not release container lock: {}", self.endpoint, e);
                }
            }
        }
    }
}
