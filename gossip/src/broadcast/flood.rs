//! Flooding broadcast: every value is forwarded to all neighbours the first
//! time it is seen. No retries, so a lost forward is never repaired.

use std::sync::Arc;

use maelstrom_node::{Body, Error, Message, Node, Result};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{BroadcastPayload, state::MessageLog};

#[derive(Debug, Default)]
pub struct FloodState {
    neighbours: Vec<String>,
    log: MessageLog,
}

impl FloodState {
    /// Records `value` and returns the neighbours it should be forwarded to.
    /// Empty when the value was already known.
    pub fn accept(&mut self, value: i64, source: &str) -> Vec<String> {
        if !self.log.insert(value) {
            return Vec::new();
        }
        self.neighbours
            .iter()
            .filter(|peer| peer.as_str() != source)
            .cloned()
            .collect()
    }
}

pub fn register(node: &Node) -> Arc<Mutex<FloodState>> {
    let state = Arc::new(Mutex::new(FloodState::default()));
    for kind in ["topology", "broadcast", "read"] {
        let state = Arc::clone(&state);
        node.handle(kind, move |node, message| {
            let state = Arc::clone(&state);
            async move { handle(&state, &node, &message) }
        });
    }
    state
}

fn handle(state: &Mutex<FloodState>, node: &Node, message: &Message) -> Result<Body> {
    let reply = match message.body.payload()? {
        BroadcastPayload::Topology { mut topology } => {
            let neighbours = topology.remove(node.id()).unwrap_or_default();
            info!(?neighbours, "topology installed");
            state.lock().neighbours = neighbours;
            BroadcastPayload::TopologyOk
        }
        BroadcastPayload::Broadcast { message: value } => {
            let targets = state.lock().accept(value, &message.src);
            for peer in &targets {
                let forward = Body::from_payload(&BroadcastPayload::Broadcast { message: value })?;
                node.send(peer, forward)?;
            }
            if !targets.is_empty() {
                debug!(value, fanout = targets.len(), "flooded");
            }
            BroadcastPayload::BroadcastOk
        }
        BroadcastPayload::Read => BroadcastPayload::ReadOk {
            messages: state.lock().log.as_slice().to_vec(),
        },
        _ => {
            return Err(Error::NotSupported(format!(
                "{} is not a flood request",
                message.body.kind
            )));
        }
    };
    Body::from_payload(&reply)
}
