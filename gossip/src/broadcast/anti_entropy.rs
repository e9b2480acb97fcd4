//! The periodic pull that drives replicas toward the same log.
//!
//! Every tick, a node asks each neighbour for whatever lies past the
//! neighbour's `last_index` as this node last heard it, and merges the answer.
//! Each neighbour is pulled on its own task so a slow or partitioned peer
//! never holds up the others, and the state lock is only taken around the
//! synchronous read of the belief and the synchronous merge.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use maelstrom_node::{Body, Error, Node, Result};
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, trace};

use super::{
    BroadcastPayload,
    state::{Delta, LogicalClock, SharedState},
};

/// How the driver reaches a neighbour.
#[async_trait]
pub trait SyncPeer: Send + Sync {
    /// Asks `peer` for entries past `belief`. `Ok(None)` means the peer had
    /// nothing to ship or declined as stale.
    async fn pull(&self, peer: &str, belief: LogicalClock) -> Result<Option<Delta>>;
}

/// [`SyncPeer`] over Maelstrom RPC.
pub struct RpcPeer {
    node: Node,
    timeout: Duration,
}

impl RpcPeer {
    pub fn new(node: Node, timeout: Duration) -> Self {
        Self { node, timeout }
    }
}

#[async_trait]
impl SyncPeer for RpcPeer {
    async fn pull(&self, peer: &str, belief: LogicalClock) -> Result<Option<Delta>> {
        let body = Body::from_payload(&BroadcastPayload::sync(belief))?;
        let reply = self.node.rpc(peer, body, self.timeout).await?;

        match reply.body.payload()? {
            BroadcastPayload::SyncOk {
                ok: true,
                messages,
                counters,
            } => Ok(Some(Delta {
                messages: messages.unwrap_or_default(),
                counters: counters.unwrap_or_default(),
            })),
            BroadcastPayload::SyncOk { ok: false, .. } => Ok(None),
            _ => Err(Error::MalformedRequest(format!(
                "expected sync_ok from {peer}, got {}",
                reply.body.kind
            ))),
        }
    }
}

pub struct AntiEntropy {
    state: SharedState,
    peer: Arc<dyn SyncPeer>,
    interval: Duration,
}

impl AntiEntropy {
    pub fn new(state: SharedState, peer: Arc<dyn SyncPeer>, interval: Duration) -> Self {
        Self {
            state,
            peer,
            interval,
        }
    }

    /// Runs rounds forever. A round that is still in flight when the next
    /// tick fires is not waited for.
    pub async fn run(self) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.round().await;
        }
    }

    /// Starts one pull per neighbour and returns their handles.
    ///
    /// Does nothing until a topology has given this node neighbours.
    pub async fn round(&self) -> Vec<JoinHandle<()>> {
        let neighbours = {
            let state = self.state.read().await;
            if state.neighbours().is_empty() {
                return Vec::new();
            }
            state.neighbours().to_vec()
        };

        neighbours
            .into_iter()
            .map(|neighbour| {
                tokio::spawn(pull_from(
                    Arc::clone(&self.state),
                    Arc::clone(&self.peer),
                    neighbour,
                ))
            })
            .collect()
    }
}

async fn pull_from(state: SharedState, peer: Arc<dyn SyncPeer>, neighbour: String) {
    let belief = state.read().await.belief_of(&neighbour);

    match peer.pull(&neighbour, belief).await {
        Ok(Some(delta)) => {
            let applied = state.write().await.merge_delta(&neighbour, delta);
            if applied > 0 {
                debug!(%neighbour, applied, "merged sync delta");
            }
        }
        Ok(None) => trace!(%neighbour, "nothing to pull"),
        Err(error) => debug!(%neighbour, %error, "sync abandoned"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::broadcast::state::ReplicatedState;

    /// Answers pulls straight from other in-memory states.
    struct LocalPeers {
        states: HashMap<String, SharedState>,
        down: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl SyncPeer for LocalPeers {
        async fn pull(&self, peer: &str, belief: LogicalClock) -> Result<Option<Delta>> {
            if self.down.lock().contains(peer) {
                return Err(Error::Timeout(format!("{peer} unreachable")));
            }
            let state = self
                .states
                .get(peer)
                .ok_or_else(|| Error::NodeNotFound(peer.to_string()))?;
            Ok(state.read().await.sync_response(belief))
        }
    }

    struct Fixture {
        peers: Arc<LocalPeers>,
    }

    impl Fixture {
        async fn new(topology: serde_json::Value) -> Self {
            let topology: HashMap<String, Vec<String>> =
                serde_json::from_value(topology).expect("topology");
            let mut states = HashMap::new();
            for id in topology.keys() {
                let state = ReplicatedState::shared();
                state.write().await.install_topology(&topology, id);
                states.insert(id.clone(), state);
            }
            Self {
                peers: Arc::new(LocalPeers {
                    states,
                    down: Mutex::default(),
                }),
            }
        }

        fn state(&self, id: &str) -> &SharedState {
            &self.peers.states[id]
        }

        async fn broadcast(&self, id: &str, value: i64) {
            let mut state = self.state(id).write().await;
            state.apply_message(value, None);
            state.touch();
        }

        async fn tick(&self, id: &str) {
            let driver = AntiEntropy::new(
                Arc::clone(self.state(id)),
                self.peers.clone(),
                Duration::from_millis(10),
            );
            for handle in driver.round().await {
                handle.await.expect("pull task");
            }
        }

        async fn tick_all(&self) {
            let mut ids: Vec<_> = self.peers.states.keys().cloned().collect();
            ids.sort();
            for id in ids {
                self.tick(&id).await;
            }
        }

        async fn read(&self, id: &str) -> Vec<i64> {
            self.state(id).read().await.snapshot_messages()
        }
    }

    #[tokio::test]
    async fn empty_node_pulls_from_its_neighbour() {
        let cluster = Fixture::new(json!({"n1": ["n2"], "n2": ["n1"]})).await;
        cluster.broadcast("n1", 7).await;
        assert!(cluster.read("n2").await.is_empty());

        cluster.tick("n2").await;

        assert_eq!(cluster.read("n2").await, vec![7]);
        let n2 = cluster.state("n2").read().await;
        assert_eq!(n2.belief_of("n1").last_index, 1);
        assert_eq!(n2.clock().last_index, 1);
    }

    #[tokio::test]
    async fn pulls_only_what_was_not_seen() {
        let cluster = Fixture::new(json!({"n1": ["n2"], "n2": ["n1"]})).await;
        cluster.broadcast("n1", 1).await;
        cluster.tick("n2").await;
        cluster.broadcast("n1", 2).await;
        cluster.tick("n2").await;

        assert_eq!(cluster.read("n2").await, vec![1, 2]);
        assert_eq!(cluster.state("n2").read().await.belief_of("n1").last_index, 2);
    }

    #[tokio::test]
    async fn line_topology_converges_within_its_diameter() {
        let cluster = Fixture::new(json!({
            "n1": ["n2"],
            "n2": ["n1", "n3"],
            "n3": ["n2", "n4"],
            "n4": ["n3"],
        }))
        .await;
        cluster.broadcast("n4", 40).await;
        cluster.broadcast("n1", 10).await;

        for _ in 0..3 {
            cluster.tick_all().await;
        }

        for id in ["n1", "n2", "n3", "n4"] {
            let mut seen = cluster.read(id).await;
            seen.sort();
            assert_eq!(seen, vec![10, 40], "{id}");
        }
    }

    #[tokio::test]
    async fn nodes_without_neighbours_never_converge() {
        let cluster = Fixture::new(json!({"n1": [], "n2": []})).await;
        cluster.broadcast("n1", 5).await;

        for _ in 0..5 {
            cluster.tick_all().await;
        }

        assert!(cluster.read("n2").await.is_empty());
    }

    #[tokio::test]
    async fn unreachable_neighbour_leaves_state_untouched() {
        let cluster = Fixture::new(json!({"n1": ["n2"], "n2": ["n1"]})).await;
        cluster.broadcast("n1", 9).await;
        cluster.peers.down.lock().insert("n1".to_string());

        cluster.tick("n2").await;
        assert!(cluster.read("n2").await.is_empty());
        assert_eq!(
            cluster.state("n2").read().await.clock(),
            LogicalClock::default()
        );

        cluster.peers.down.lock().clear();
        cluster.tick("n2").await;
        assert_eq!(cluster.read("n2").await, vec![9]);
    }
}
