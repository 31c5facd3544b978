//! Long-running endpoint supervisor.

use console::style;

use inbound::config::Config;
use inbound::endpoint::EndpointContext;
use inbound::supervisor::{EndpointExit, Supervisor};

use crate::cli::icons::{dim_arrow, error, info, success};

fn report_exit(exit: &EndpointExit) {
    match exit.result {
        Ok(()) => eprintln!("{} {} stopped", success(), style(&exit.name).bold()),
        Err(ref e) => eprintln!("{} {} failed: {}", error(), style(&exit.name).bold(), e),
    }
}

/// Start the endpoints and run until Ctrl-C or until every endpoint stops.
pub async fn cmd_run(
    config: &Config,
    ctx: &EndpointContext,
    endpoints: &[String],
) -> anyhow::Result<()> {
    let mut supervisor = Supervisor::start(config, ctx, endpoints)?;
    if supervisor.is_empty() {
        anyhow::bail!("No endpoints could be started");
    }

    eprintln!(
        "{} Running {} endpoint(s) as node {}",
        info(),
        supervisor.len(),
        style(&ctx.node_id).cyan()
    );
    eprintln!("  {} Press Ctrl-C to stop", dim_arrow());

    let mut failed = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("{} Shutting down...", info());
                break;
            }
            exit = supervisor.join_next() => match exit {
                Some(exit) => {
                    report_exit(&exit);
                    failed += usize::from(exit.result.is_err());
                    if supervisor.is_empty() {
                        break;
                    }
                }
                None => break,
            }
        }
    }

    for exit in supervisor.shutdown().await {
        report_exit(&exit);
        failed += usize::from(exit.result.is_err());
    }

    if failed > 0 {
        anyhow::bail!("{} endpoint(s) failed", failed);
    }
    Ok(())
}
