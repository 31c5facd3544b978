//! One-shot poll cycle.

use console::style;

use inbound::config::{Config, EndpointConfig};
use inbound::endpoint::{build_file_endpoint, EndpointContext};
use inbound::work_queue::CycleStatus;

use crate::cli::icons::{dim_arrow, info, success, warn};

pub async fn cmd_poll(config: &Config, ctx: &EndpointContext, name: &str) -> anyhow::Result<()> {
    let endpoint = config.endpoint(name)?;
    endpoint.validate(&config.sequences)?;
    let EndpointConfig::File(ref file) = endpoint else {
        anyhow::bail!(
            "'{}' is a {} endpoint; only file endpoints can be polled once",
            name,
            endpoint.protocol()
        );
    };

    let mut poller = build_file_endpoint(file, ctx)?;
    eprintln!("{} Polling {}", info(), style(name).bold());
    let report = poller.execute().await;

    match report.status {
        CycleStatus::Completed => eprintln!("{} Cycle completed", success()),
        CycleStatus::NotDue => eprintln!("{} Cycle not due", warn()),
        CycleStatus::ContainerBusy => {
            eprintln!("{} Directory is locked by another node", warn())
        }
        CycleStatus::Cancelled => eprintln!("{} Cycle cancelled", warn()),
        CycleStatus::Unavailable(ref reason) => {
            anyhow::bail!("Container unavailable: {}", reason)
        }
    }

    eprintln!("  {} Succeeded: {}", dim_arrow(), style(report.succeeded).green());
    eprintln!("  {} Failed: {}", dim_arrow(), style(report.failed).red());
    eprintln!("  {} Skipped: {}", dim_arrow(), report.skipped);
    if report.unclaimed > 0 {
        eprintln!("  {} Held elsewhere: {}", dim_arrow(), report.unclaimed);
    }
    if report.recovered > 0 {
        eprintln!("  {} Recovered: {}", dim_arrow(), report.recovered);
    }
    if report.finalization_errors > 0 {
        eprintln!(
            "  {} Finalization errors: {}",
            dim_arrow(),
            style(report.finalization_errors).red()
        );
    }
    if report.capped {
        eprintln!("  {} Item limit reached, remaining files deferred", dim_arrow());
    }
    Ok(())
}
