//! Maelstrom workloads built on `maelstrom-node`.
//!
//! Each module registers its handlers on a [`maelstrom_node::Node`]; the
//! binary picks one with a subcommand and runs it over stdin/stdout.
//!
//! - [`broadcast`] replicates a set of integers across a fixed topology,
//!   either by periodic anti-entropy pulls or by flooding.
//! - [`counter`] is a grow-only counter stored in `seq-kv`.
//! - [`kafka`] is a single-node log service with committed offsets.
//! - [`echo`] and [`unique`] are the warm-up workloads.
//! - [`cli`] parses the command line.

pub mod broadcast;
pub mod cli;
pub mod counter;
pub mod echo;
pub mod kafka;
pub mod unique;
