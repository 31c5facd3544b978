//! Post-processing policy for file endpoints.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::item::FileItem;
use super::uri::FileUri;
use crate::work_queue::{Clock, FinalAction, Outcome, OutcomeResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PostAction {
    Delete,
    Move,
}

#[derive(Debug, Clone, Default)]
pub struct PostProcessPolicy {
    pub after_success: Option<PostAction>,
    pub success_dir: Option<FileUri>,
    pub after_failure: Option<PostAction>,
    pub failure_dir: Option<FileUri>,
    /// strftime prefix for moved file names.
    pub file_timestamp_format: Option<String>,
    /// strftime name of a subfolder created under the destination.
    pub subfolder_timestamp_format: Option<String>,
}

pub struct FileOutcomeResolver {
    endpoint: String,
    policy: PostProcessPolicy,
    clock: Arc<dyn Clock>,
}

impl FileOutcomeResolver {
    pub fn new(endpoint: impl Into<String>, policy: PostProcessPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            endpoint: endpoint.into(),
            policy,
            clock,
        }
    }

    /// Directories moves may land in; subfolders below them are created on demand.
    pub fn move_roots(&self) -> Vec<PathBuf> {
        [&self.policy.success_dir, &self.policy.failure_dir]
            .into_iter()
            .flatten()
            .map(|uri| uri.path().to_path_buf())
            .collect()
    }

    /// Full target path for `item` under `dir`.
    pub fn destination(&self, item: &FileItem, dir: &FileUri) -> PathBuf {
        let now = self.clock.now().with_timezone(&Local);
        let mut target = dir.path().to_path_buf();

        if let Some(ref fmt) = self.policy.subfolder_timestamp_format {
            target.push(now.format(fmt).to_string());
        }
        if dir.recursive() {
            if let Some(ref rel) = item.relative_dir {
                target.push(rel);
            }
        }

        let name = match self.policy.file_timestamp_format {
            Some(ref fmt) => format!("{}{}", now.format(fmt), item.name),
            None => item.name.clone(),
        };
        target.push(name);
        target
    }

    fn on_success(&self, item: &FileItem) -> FinalAction {
        match (self.policy.after_success, &self.policy.success_dir) {
            (Some(PostAction::Move), Some(dir)) => FinalAction::MoveToSuccess {
                destination: self.destination(item, dir),
            },
            (Some(PostAction::Move), None) => {
                warn!(
                    "{}: move after process has no destination, deleting {}",
                    self.endpoint,
                    item.path.display()
                );
                FinalAction::Delete
            }
            (Some(PostAction::Delete), _) => FinalAction::Delete,
            (None, _) => {
                debug!(
                    "{}: no action after process configured, deleting {}",
                    self.endpoint,
                    item.path.display()
                );
                FinalAction::Delete
            }
        }
    }

    fn on_failure(&self, item: &FileItem) -> FinalAction {
        match (self.policy.after_failure, &self.policy.failure_dir) {
            (Some(PostAction::Move), Some(dir)) => FinalAction::MoveToFailure {
                destination: self.destination(item, dir),
            },
            (Some(PostAction::Delete), _) => FinalAction::Delete,
            (Some(PostAction::Move), None) => {
                warn!(
                    "{}: move after failure has no destination, marking {} as failed",
                    self.endpoint,
                    item.path.display()
                );
                FinalAction::MarkFailed
            }
            (None, _) => {
                warn!(
                    "{}: no action after failure configured, marking {} as failed",
                    self.endpoint,
                    item.path.display()
                );
                FinalAction::MarkFailed
            }
        }
    }
}

impl OutcomeResolver<FileItem> for FileOutcomeResolver {
    fn resolve(&self, item: &FileItem, outcome: &Outcome) -> FinalAction {
        match outcome {
            Outcome::Success => self.on_success(item),
            Outcome::Skipped(_) => FinalAction::LeaveInPlace,
            Outcome::TransientFailure(_) | Outcome::PermanentFailure(_) => self.on_failure(item),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work_queue::{ManualClock, SkipReason};
    use chrono::{DateTime, TimeZone, Utc};
    use std::path::Path;

    fn item(rel: Option<&str>) -> FileItem {
        let mut item = FileItem::new(
            Path::new("/in/sub/a.xml"),
            1,
            DateTime::<Utc>::from(std::time::UNIX_EPOCH),
        );
        item.relative_dir = rel.map(PathBuf::from);
        item
    }

    fn resolver(policy: PostProcessPolicy) -> FileOutcomeResolver {
        let at = Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc);
        FileOutcomeResolver::new("test", policy, Arc::new(ManualClock::new(at)))
    }

    fn failure() -> Outcome {
        Outcome::PermanentFailure("boom".to_string())
    }

    #[test]
    fn test_defaults_delete_on_success_and_mark_on_failure() {
        let r = resolver(PostProcessPolicy::default());
        assert_eq!(r.resolve(&item(None), &Outcome::Success), FinalAction::Delete);
        assert_eq!(r.resolve(&item(None), &failure()), FinalAction::MarkFailed);
    }

    #[test]
    fn test_skipped_is_left_in_place() {
        let r = resolver(PostProcessPolicy::default());
        assert_eq!(
            r.resolve(&item(None), &Outcome::Skipped(SkipReason::SizeLimitExceeded)),
            FinalAction::LeaveInPlace
        );
    }

    #[test]
    fn test_move_without_destination_degrades() {
        let r = resolver(PostProcessPolicy {
            after_success: Some(PostAction::Move),
            after_failure: Some(PostAction::Move),
            ..Default::default()
        });
        assert_eq!(r.resolve(&item(None), &Outcome::Success), FinalAction::Delete);
        assert_eq!(r.resolve(&item(None), &failure()), FinalAction::MarkFailed);
    }

    #[test]
    fn test_move_with_timestamps_and_preserved_subdirs() {
        let r = resolver(PostProcessPolicy {
            after_success: Some(PostAction::Move),
            success_dir: Some(FileUri::parse("/out/*").unwrap()),
            file_timestamp_format: Some("%H%M_".to_string()),
            subfolder_timestamp_format: Some("%Y-%m-%d".to_string()),
            ..Default::default()
        });
        assert_eq!(
            r.resolve(&item(Some("sub")), &Outcome::Success),
            FinalAction::MoveToSuccess {
                destination: PathBuf::from("/out/2024-03-09/sub/1405_a.xml")
            }
        );
    }

    #[test]
    fn test_move_without_suffix_flattens() {
        let r = resolver(PostProcessPolicy {
            after_failure: Some(PostAction::Move),
            failure_dir: Some(FileUri::parse("/failed").unwrap()),
            ..Default::default()
        });
        assert_eq!(
            r.resolve(&item(Some("sub")), &Outcome::TransientFailure("later".into())),
            FinalAction::MoveToFailure {
                destination: PathBuf::from("/failed/a.xml")
            }
        );
        assert_eq!(r.move_roots(), vec![PathBuf::from("/failed")]);
    }
}
