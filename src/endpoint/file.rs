use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::{invalid, EndpointContext};
use crate::config::{ConfigError, FileEndpointConfig};
use crate::file::{
    ContainerConnector, DirectoryScanner, FileLocker, FileOutcomeResolver, FileQueue,
    FileQueueSettings, FileUri, PostProcessPolicy, ReleasePolicy, ScanOptions, SortOrder,
    SortSpec,
};
use crate::work_queue::{PollCycle, RetryPolicy, RetryingConnector, Throttle};

pub type FilePoller = PollCycle<FileQueue, FileOutcomeResolver>;

fn parse_uri(
    config: &FileEndpointConfig,
    raw: Option<&str>,
    ctx: &EndpointContext,
) -> Result<Option<FileUri>, ConfigError> {
    raw.map(|raw| {
        FileUri::parse(raw)
            .map(|uri| uri.resolve_relative(&ctx.base_dir))
            .map_err(|e| invalid(&config.name, e))
    })
    .transpose()
}

fn scan_options(config: &FileEndpointConfig, recursive: bool) -> Result<ScanOptions, ConfigError> {
    let pattern = config
        .file_name_pattern
        .as_deref()
        .map(ScanOptions::compile_pattern)
        .transpose()
        .map_err(|e| invalid(&config.name, e))?;

    let sort = config.sort_by.map(|key| SortSpec {
        key,
        order: if config.sort_ascending {
            SortOrder::Ascending
        } else {
            SortOrder::Descending
        },
    });

    Ok(ScanOptions {
        pattern,
        sort,
        recursive,
        min_age: config.wait_time_before_read_ms.map(Duration::from_millis),
        include_fail_marked: config.retry_failed_finalization,
    })
}

/// Build the poll cycle for a file endpoint.
pub fn build_file_endpoint(
    config: &FileEndpointConfig,
    ctx: &EndpointContext,
) -> Result<FilePoller, ConfigError> {
    let source = parse_uri(config, Some(&config.file_uri), ctx)?
        .ok_or_else(|| invalid(&config.name, "file_uri is required"))?;

    let policy = PostProcessPolicy {
        after_success: config.action_after_process,
        success_dir: parse_uri(config, config.move_after_process.as_deref(), ctx)?,
        after_failure: config.action_after_failure,
        failure_dir: parse_uri(config, config.move_after_failure.as_deref(), ctx)?,
        file_timestamp_format: config.move_timestamp_format.clone(),
        subfolder_timestamp_format: config.subfolder_timestamp.clone(),
    };
    let resolver = FileOutcomeResolver::new(&config.name, policy, ctx.clock.clone());

    let scanner = DirectoryScanner::new(scan_options(config, source.recursive())?, ctx.clock.clone());

    let locker = FileLocker::new(
        &ctx.node_id,
        ReleasePolicy {
            enabled: config.auto_lock_release,
            max_age: config.auto_lock_release_interval_ms.map(Duration::from_millis),
            same_node_only: config.auto_lock_release_same_node,
        },
        ctx.clock.clone(),
    );

    let settings = FileQueueSettings {
        locking: config.locking,
        force_create_folder: config.force_create_folder,
        update_last_modified: config.update_last_modified,
        content_type: config.content_type.clone(),
        move_roots: resolver.move_roots(),
    };

    let connector = RetryingConnector::new(
        ContainerConnector::new(source.clone()),
        RetryPolicy::from_config(config.max_retry_count, config.reconnect_timeout_ms),
    );

    let mut queue = FileQueue::new(
        &config.name,
        connector,
        scanner,
        locker,
        settings,
        ctx.cancel.clone(),
    );
    if config.distributed_lock {
        let timeout = config.distributed_lock_timeout_ms.map(Duration::from_millis);
        queue = queue.with_container_lock(FileLocker::new(
            &ctx.node_id,
            ReleasePolicy {
                enabled: timeout.is_some(),
                max_age: timeout,
                same_node_only: false,
            },
            ctx.clock.clone(),
        ));
    }

    let processor = Arc::new(ctx.processor(
        &config.name,
        &config.sequence,
        config.on_error_sequence.as_deref(),
        config.file_size_limit,
        config.content_type.as_deref(),
    ));

    let throttle = Throttle {
        item_interval: config.file_process_interval_ms.map(Duration::from_millis),
        max_items: config.file_process_count,
    };

    info!(
        "{}: polling {} every {} ms",
        config.name,
        source.masked(),
        config.interval_ms
    );

    Ok(PollCycle::new(
        &config.name,
        queue,
        resolver,
        processor,
        ctx.clock.clone(),
        Duration::from_millis(config.interval_ms),
        throttle,
        ctx.cancel.clone(),
    ))
}
