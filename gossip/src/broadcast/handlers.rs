//! Request handlers for the anti-entropy broadcast.
//!
//! Writers (`topology`, `broadcast`) take the state lock exclusively; readers
//! (`read`, `sync`) share it. None of them waits on the network while holding
//! the lock.

use std::collections::HashMap;

use maelstrom_node::{Body, Error, Message, Node, Result};
use tracing::info;

use super::{
    BroadcastPayload,
    state::{LogicalClock, SharedState},
};

pub async fn handle(state: SharedState, node: Node, message: Message) -> Result<Body> {
    let reply = match message.body.payload()? {
        BroadcastPayload::Topology { topology } => {
            on_topology(&state, node.id(), &topology).await
        }
        BroadcastPayload::Broadcast { message: value } => {
            on_broadcast(&state, value, &message.src).await
        }
        BroadcastPayload::Read => on_read(&state).await,
        BroadcastPayload::Sync { time, last_index } => {
            on_sync_request(&state, LogicalClock::new(time, last_index)).await
        }
        _ => {
            return Err(Error::NotSupported(format!(
                "{} is a reply, not a request",
                message.body.kind
            )));
        }
    };
    Body::from_payload(&reply)
}

pub async fn on_topology(
    state: &SharedState,
    self_id: &str,
    topology: &HashMap<String, Vec<String>>,
) -> BroadcastPayload {
    let mut state = state.write().await;
    state.install_topology(topology, self_id);
    info!(neighbours = ?state.neighbours(), "topology installed");
    BroadcastPayload::TopologyOk
}

/// Records `value` and acknowledges. Duplicates are acknowledged too.
pub async fn on_broadcast(state: &SharedState, value: i64, source: &str) -> BroadcastPayload {
    let mut state = state.write().await;
    state.apply_message(value, Some(source));
    state.touch();
    BroadcastPayload::BroadcastOk
}

pub async fn on_read(state: &SharedState) -> BroadcastPayload {
    let messages = state.read().await.snapshot_messages();
    BroadcastPayload::ReadOk { messages }
}

pub async fn on_sync_request(state: &SharedState, claimed: LogicalClock) -> BroadcastPayload {
    let delta = state.read().await.sync_response(claimed);
    BroadcastPayload::sync_ok(delta)
}
