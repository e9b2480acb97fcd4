//! Broadcast workloads.
//!
//! - [`state`] holds the replicated log and logical clocks.
//! - [`handlers`] answers `topology`, `broadcast`, `read`, and `sync`.
//! - [`anti_entropy`] pulls deltas from neighbours on a fixed tick.
//! - [`flood`] is the baseline variant that re-sends every new value to its
//!   neighbours instead of reconciling.

use std::{collections::HashMap, sync::Arc, time::Duration};

use maelstrom_node::Node;
use serde::{Deserialize, Serialize};

pub mod anti_entropy;
pub mod flood;
pub mod handlers;
pub mod state;

use anti_entropy::{AntiEntropy, RpcPeer};
use state::{Delta, LogicalClock, ReplicatedState, SharedState};

/// Default anti-entropy tick.
pub const SYNC_INTERVAL: Duration = Duration::from_millis(200);

/// Default deadline for one outbound `sync`.
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastPayload {
    Topology {
        topology: HashMap<String, Vec<String>>,
    },
    TopologyOk,
    Broadcast {
        message: i64,
    },
    BroadcastOk,
    Read,
    ReadOk {
        messages: Vec<i64>,
    },
    Sync {
        time: u64,
        #[serde(rename = "lastIndex")]
        last_index: u64,
    },
    SyncOk {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        messages: Option<Vec<i64>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        counters: Option<HashMap<String, LogicalClock>>,
    },
}

impl BroadcastPayload {
    pub fn sync(belief: LogicalClock) -> Self {
        BroadcastPayload::Sync {
            time: belief.time,
            last_index: belief.last_index,
        }
    }

    /// `sync_ok` for a responder's answer; `None` renders as `ok: false`.
    pub fn sync_ok(delta: Option<Delta>) -> Self {
        match delta {
            Some(Delta { messages, counters }) => BroadcastPayload::SyncOk {
                ok: true,
                messages: Some(messages),
                counters: Some(counters),
            },
            None => BroadcastPayload::SyncOk {
                ok: false,
                messages: None,
                counters: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: SYNC_INTERVAL,
            timeout: SYNC_TIMEOUT,
        }
    }
}

/// Installs the anti-entropy broadcast on `node` and starts its sync driver.
///
/// Returns the shared state so callers (and tests) can inspect it.
pub fn register(node: &Node, config: SyncConfig) -> SharedState {
    let state = ReplicatedState::shared();

    for kind in ["topology", "broadcast", "read", "sync"] {
        let state = Arc::clone(&state);
        node.handle(kind, move |node, message| {
            handlers::handle(Arc::clone(&state), node, message)
        });
    }

    let peer = RpcPeer::new(node.clone(), config.timeout);
    let driver = AntiEntropy::new(Arc::clone(&state), Arc::new(peer), config.interval);
    tokio::spawn(driver.run());

    state
}
