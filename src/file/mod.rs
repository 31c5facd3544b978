//! File polling endpoint.
//!
//! A container is a directory (or a single file) addressed by a file URI.
//! Items are claimed with sidecar lock markers, processed, and then moved,
//! deleted or fail-marked according to the endpoint's post-processing policy.

pub mod finalize;
pub mod item;
pub mod lock;
pub mod queue;
pub mod scan;
pub mod uri;

pub use finalize::{FileOutcomeResolver, PostAction, PostProcessPolicy};
pub use item::FileItem;
pub use lock::{FailRecord, FileLocker, ReleasePolicy};
pub use queue::{Container, ContainerConnector, FileQueue, FileQueueSettings};
pub use scan::{DirectoryScanner, ScanOptions, SortKey, SortOrder, SortSpec};
pub use uri::{FileUri, UriError};

pub const LOCK_SUFFIX: &str = ".lock";
pub const FAIL_SUFFIX: &str = ".fail";
/// Suffix of the marker serializing lock breakers (`<name>.lock.break`).
pub const BREAK_SUFFIX: &str = ".break";
/// Stem of the container-level lock (`.inbound.lock`).
pub const CONTAINER_LOCK_STEM: &str = ".inbound";

pub const HEADER_FILE_PATH: &str = "FILE_PATH";
pub const HEADER_FILE_NAME: &str = "FILE_NAME";
pub const HEADER_FILE_URI: &str = "FILE_URI";
pub const HEADER_FILE_LENGTH: &str = "FILE_LENGTH";
pub const HEADER_LAST_MODIFIED: &str = "LAST_MODIFIED";
pub const HEADER_RELATIVE_PATH: &str = "RELATIVE_PATH";
