use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{self, BufReader};
use tracing::info;

use gossip::{
    broadcast::{self, SyncConfig},
    cli::{Cli, Command},
    counter::{self, CounterConfig},
    echo, kafka, unique,
};
use maelstrom_node::Node;

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    info!(command = ?cli.command, "starting workload");
    let (node, outbox) = Node::new();

    match cli.command {
        Command::Echo => echo::register(&node),
        Command::UniqueIds => unique::register(&node),
        Command::Broadcast(args) => {
            broadcast::register(
                &node,
                SyncConfig {
                    interval: Duration::from_millis(args.sync_interval_ms),
                    timeout: Duration::from_millis(args.sync_timeout_ms),
                },
            );
        }
        Command::BroadcastFlood => {
            broadcast::flood::register(&node);
        }
        Command::GCounter(args) => {
            counter::register(
                &node,
                CounterConfig {
                    cas_retries: args.cas_retries,
                    kv_timeout: Duration::from_millis(args.kv_timeout_ms),
                },
            );
        }
        Command::Kafka(args) => {
            kafka::register(&node, args.poll_batch);
        }
    }

    node.serve(BufReader::new(io::stdin()), io::stdout(), outbox)
        .await
        .context("maelstrom transport failed")?;
    Ok(())
}
