//! Replicated state for the anti-entropy broadcast.
//!
//! Each node keeps its own copy of the broadcast set as an append-only log in
//! discovery order, a logical clock describing that log, and what it believes
//! every other node's clock to be. All of it lives behind one `RwLock`
//! ([`SharedState`]); the methods here are synchronous and never block.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::trace;

pub type SharedState = Arc<RwLock<ReplicatedState>>;

/// A node's progress: how many local mutation rounds it has applied (`time`)
/// and how long its message log is (`last_index`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalClock {
    pub time: u64,
    #[serde(rename = "lastIndex")]
    pub last_index: u64,
}

impl LogicalClock {
    pub fn new(time: u64, last_index: u64) -> Self {
        Self { time, last_index }
    }

    /// Elementwise maximum. Never moves either field backwards.
    pub fn merge(self, other: Self) -> Self {
        Self {
            time: self.time.max(other.time),
            last_index: self.last_index.max(other.last_index),
        }
    }
}

/// Append-only log plus the set of values already in it.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<i64>,
    seen: HashSet<i64>,
}

impl MessageLog {
    /// Appends `value` unless it is already present. Returns whether it was new.
    pub fn insert(&mut self, value: i64) -> bool {
        if !self.seen.insert(value) {
            return false;
        }
        self.entries.push(value);
        true
    }

    pub fn contains(&self, value: i64) -> bool {
        self.seen.contains(&value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.entries
    }

    /// Entries at `from` and after. Past the end yields an empty slice.
    pub fn suffix(&self, from: u64) -> &[i64] {
        let from = usize::try_from(from).unwrap_or(usize::MAX);
        self.entries.get(from..).unwrap_or_default()
    }
}

/// What a responder ships back for a sync request: the unseen tail of its log
/// and its entire clock table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    pub messages: Vec<i64>,
    pub counters: HashMap<String, LogicalClock>,
}

#[derive(Debug, Default)]
pub struct ReplicatedState {
    self_id: String,
    /// Authoritative clock for this node. Reported under `self_id` in the
    /// clock table.
    clock: LogicalClock,
    /// Beliefs about every other node named by the topology.
    views: HashMap<String, LogicalClock>,
    neighbours: Vec<String>,
    log: MessageLog,
}

impl ReplicatedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Adopts `topology[self_id]` as the neighbour list and resets every
    /// peer belief to zero.
    ///
    /// This node's own clock stays authoritative, so its `last_index` keeps
    /// matching the log even if topology is installed again later.
    pub fn install_topology(&mut self, topology: &HashMap<String, Vec<String>>, self_id: &str) {
        self.self_id = self_id.to_string();
        self.neighbours = topology.get(self_id).cloned().unwrap_or_default();
        self.views = topology
            .keys()
            .filter(|id| id.as_str() != self_id)
            .map(|id| (id.clone(), LogicalClock::default()))
            .collect();
    }

    /// Adds `value` to the log if it is new, advancing `last_index`. Does not
    /// advance `time`; see [`ReplicatedState::touch`].
    pub fn apply_message(&mut self, value: i64, source: Option<&str>) -> bool {
        if !self.log.insert(value) {
            return false;
        }
        self.clock.last_index += 1;
        trace!(value, source = source.unwrap_or("local"), "applied");
        true
    }

    /// Advances this node's `time` by one mutation round.
    pub fn touch(&mut self) {
        self.clock.time += 1;
    }

    pub fn snapshot_messages(&self) -> Vec<i64> {
        self.log.as_slice().to_vec()
    }

    /// Answers a peer that believes this node is at `claimed`.
    ///
    /// Returns `None` ("not applicable") when this node's own `time` is behind
    /// the claim, or when nothing exists past `claimed.last_index`.
    pub fn sync_response(&self, claimed: LogicalClock) -> Option<Delta> {
        if self.clock.time < claimed.time {
            return None;
        }

        let messages = self.log.suffix(claimed.last_index);
        if messages.is_empty() {
            return None;
        }

        Some(Delta {
            messages: messages.to_vec(),
            counters: self.clock_table(),
        })
    }

    /// Folds a peer's sync response into this state: clocks by elementwise
    /// maximum, messages by deduplicated append, then one `touch`.
    ///
    /// An empty delta changes nothing. Returns how many values were new.
    pub fn merge_delta(&mut self, from: &str, delta: Delta) -> usize {
        if delta.messages.is_empty() {
            return 0;
        }

        for (peer, clock) in delta.counters {
            if peer == self.self_id {
                self.clock = self.clock.merge(clock);
            } else {
                let view = self.views.entry(peer).or_default();
                *view = view.merge(clock);
            }
        }

        let mut applied = 0;
        for value in delta.messages {
            if self.apply_message(value, Some(from)) {
                applied += 1;
            }
        }
        self.touch();
        applied
    }

    /// Every clock this node knows, its own included.
    pub fn clock_table(&self) -> HashMap<String, LogicalClock> {
        let mut table = self.views.clone();
        if !self.self_id.is_empty() {
            table.insert(self.self_id.clone(), self.clock);
        }
        table
    }

    /// What this node believes `peer`'s clock to be.
    pub fn belief_of(&self, peer: &str) -> LogicalClock {
        if peer == self.self_id {
            return self.clock;
        }
        self.views.get(peer).copied().unwrap_or_default()
    }

    pub fn clock(&self) -> LogicalClock {
        self.clock
    }

    pub fn neighbours(&self) -> &[String] {
        &self.neighbours
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }
}
