//! Globally unique ids without coordination.
//!
//! An id is `{node}-{unix_nanos}-{seq}`. The node id keeps nodes apart and
//! the per-process sequence keeps two requests landing on the same
//! nanosecond apart.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use maelstrom_node::{Body, Error, Node};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UniquePayload {
    Generate,
    GenerateOk { id: String },
}

#[derive(Debug, Default)]
pub struct IdGenerator {
    seq: AtomicU64,
}

impl IdGenerator {
    pub fn next_id(&self, node_id: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        format!("{node_id}-{nanos}-{seq}")
    }
}

pub fn register(node: &Node) {
    let ids = Arc::new(IdGenerator::default());
    node.handle("generate", move |node, message| {
        let ids = Arc::clone(&ids);
        async move {
            match message.body.payload()? {
                UniquePayload::Generate => Body::from_payload(&UniquePayload::GenerateOk {
                    id: ids.next_id(node.id()),
                }),
                UniquePayload::GenerateOk { .. } => {
                    Err(Error::NotSupported("generate_ok is a reply".into()))
                }
            }
        }
    });
}
