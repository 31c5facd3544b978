//! File endpoint configuration.

use serde::{Deserialize, Serialize};

use crate::file::{PostAction, SortKey};

fn default_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_size_limit() -> i64 {
    -1
}

fn default_reconnect_timeout_ms() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEndpointConfig {
    pub name: String,
    /// `file://` URI or plain path. A trailing `/*` includes sub-directories.
    pub file_uri: String,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    pub sequence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error_sequence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default = "default_true")]
    pub locking: bool,
    /// Regex matched against the whole base name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortKey>,
    #[serde(default = "default_true")]
    pub sort_ascending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_process_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_process_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_after_process: Option<PostAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_after_process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_after_failure: Option<PostAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_after_failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_timestamp_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subfolder_timestamp: Option<String>,
    #[serde(default)]
    pub force_create_folder: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_last_modified: Option<bool>,
    /// Bytes, -1 for unlimited.
    #[serde(default = "default_size_limit")]
    pub file_size_limit: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_time_before_read_ms: Option<u64>,
    /// Connector retries, -1 for infinite.
    #[serde(default)]
    pub max_retry_count: i64,
    #[serde(default = "default_reconnect_timeout_ms")]
    pub reconnect_timeout_ms: u64,
    #[serde(default)]
    pub auto_lock_release: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_lock_release_interval_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub auto_lock_release_same_node: bool,
    #[serde(default)]
    pub distributed_lock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distributed_lock_timeout_ms: Option<u64>,
    /// Re-apply the recorded disposition of fail-marked items.
    #[serde(default)]
    pub retry_failed_finalization: bool,
}

impl FileEndpointConfig {
    /// Minimal endpoint polling `file_uri` into `sequence`.
    pub fn new(
        name: impl Into<String>,
        file_uri: impl Into<String>,
        sequence: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            file_uri: file_uri.into(),
            interval_ms: default_interval_ms(),
            sequence: sequence.into(),
            on_error_sequence: None,
            content_type: None,
            locking: true,
            file_name_pattern: None,
            sort_by: None,
            sort_ascending: true,
            file_process_interval_ms: None,
            file_process_count: None,
            action_after_process: None,
            move_after_process: None,
            action_after_failure: None,
            move_after_failure: None,
            move_timestamp_format: None,
            subfolder_timestamp: None,
            force_create_folder: false,
            update_last_modified: None,
            file_size_limit: default_size_limit(),
            wait_time_before_read_ms: None,
            max_retry_count: 0,
            reconnect_timeout_ms: default_reconnect_timeout_ms(),
            auto_lock_release: false,
            auto_lock_release_interval_ms: None,
            auto_lock_release_same_node: true,
            distributed_lock: false,
            distributed_lock_timeout_ms: None,
            retry_failed_finalization: false,
        }
    }
}
