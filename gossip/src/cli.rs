use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reply to every `echo` with its own payload.
    Echo,
    /// Hand out globally unique ids.
    UniqueIds,
    /// Replicate broadcasts with periodic anti-entropy pulls.
    Broadcast(BroadcastArgs),
    /// Replicate broadcasts by forwarding each new value to every neighbour.
    BroadcastFlood,
    /// Grow-only counter backed by `seq-kv`.
    GCounter(CounterArgs),
    /// Single-node append-only logs with committed offsets.
    Kafka(KafkaArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BroadcastArgs {
    /// Milliseconds between anti-entropy rounds.
    #[arg(long, default_value_t = 200)]
    pub sync_interval_ms: u64,

    /// Milliseconds to wait for a neighbour's `sync_ok`.
    #[arg(long, default_value_t = 1000)]
    pub sync_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct CounterArgs {
    /// Compare-and-set attempts per `add` before giving up.
    #[arg(long, default_value_t = 3)]
    pub cas_retries: u32,

    /// Milliseconds to wait for each `seq-kv` call.
    #[arg(long, default_value_t = 2000)]
    pub kv_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct KafkaArgs {
    /// Maximum entries returned per key by one `poll`.
    #[arg(long, default_value_t = 10)]
    pub poll_batch: usize,
}
