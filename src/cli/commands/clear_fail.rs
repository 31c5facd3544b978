//! Manual clearing of fail records.

use std::path::Path;

use inbound::file::lock::{clear_fail_record, lock_path, read_fail_record};

use crate::cli::icons::{success, warn};

pub async fn cmd_clear_fail(path: &Path, unlock: bool) -> anyhow::Result<()> {
    let record = read_fail_record(path).await?;
    if clear_fail_record(path).await? {
        match record {
            Some(record) => eprintln!(
                "{} Cleared fail record of {} ({})",
                success(),
                path.display(),
                record
            ),
            None => eprintln!("{} Cleared fail record of {}", success(), path.display()),
        }
    } else {
        eprintln!("{} {} has no fail record", warn(), path.display());
    }

    if unlock {
        let lock = lock_path(path);
        match tokio::fs::remove_file(&lock).await {
            Ok(()) => eprintln!("{} Removed {}", success(), lock.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
