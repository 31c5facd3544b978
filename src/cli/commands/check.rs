//! Configuration validation.

use console::style;

use inbound::broker::AmqpAddresses;
use inbound::config::{Config, EndpointConfig};
use inbound::file::FileUri;

use crate::cli::icons::{dim_arrow, error, success};

fn describe(endpoint: &EndpointConfig) -> String {
    match endpoint {
        EndpointConfig::File(c) => FileUri::parse(&c.file_uri)
            .map(|uri| uri.masked())
            .unwrap_or_else(|_| c.file_uri.clone()),
        EndpointConfig::Rabbitmq(c) => {
            let addresses = AmqpAddresses::from_config(c)
                .map(|a| a.describe())
                .unwrap_or_else(|_| c.hosts.clone());
            format!("{} queue '{}'", addresses, c.queue_name())
        }
    }
}

pub fn cmd_check(config: &Config) -> anyhow::Result<()> {
    if let Some(ref path) = config.source_path {
        eprintln!("{} Config: {}", dim_arrow(), path.display());
    }
    eprintln!("{} Node: {}", dim_arrow(), config.node_id());
    eprintln!(
        "{} Sequences: {}",
        dim_arrow(),
        config.sequences.len()
    );
    eprintln!();

    for endpoint in &config.endpoints {
        println!(
            "  {:<20} {:<10} {} {} {}",
            style(endpoint.name()).bold(),
            endpoint.protocol(),
            describe(endpoint),
            style("→").dim(),
            endpoint.sequence()
        );
    }
    eprintln!();

    let problems = config.validate();
    if problems.is_empty() {
        eprintln!(
            "{} {} endpoint(s) valid",
            success(),
            config.endpoints.len()
        );
        return Ok(());
    }

    for problem in &problems {
        eprintln!("{} {}", error(), problem);
    }
    anyhow::bail!("{} configuration problem(s)", problems.len())
}
