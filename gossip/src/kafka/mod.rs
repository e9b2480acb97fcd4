//! Single-node Kafka-style log service.

use std::{collections::HashMap, sync::Arc};

use maelstrom_node::{Body, Error, Node, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub mod log;

use log::LogStore;

/// Default cap on entries returned per key by one `poll`.
pub const POLL_BATCH: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KafkaPayload {
    Send {
        key: String,
        msg: i64,
    },
    SendOk {
        offset: u64,
    },
    Poll {
        offsets: HashMap<String, u64>,
    },
    PollOk {
        msgs: HashMap<String, Vec<(u64, i64)>>,
    },
    CommitOffsets {
        offsets: HashMap<String, u64>,
    },
    CommitOffsetsOk,
    ListCommittedOffsets {
        keys: Vec<String>,
    },
    ListCommittedOffsetsOk {
        offsets: HashMap<String, u64>,
    },
}

pub fn register(node: &Node, poll_batch: usize) -> Arc<Mutex<LogStore>> {
    let store = Arc::new(Mutex::new(LogStore::default()));
    for kind in ["send", "poll", "commit_offsets", "list_committed_offsets"] {
        let store = Arc::clone(&store);
        node.handle(kind, move |_node, message| {
            let store = Arc::clone(&store);
            async move {
                let reply = apply(&store, message.body.payload()?, poll_batch)?;
                Body::from_payload(&reply)
            }
        });
    }
    store
}

fn apply(store: &Mutex<LogStore>, request: KafkaPayload, poll_batch: usize) -> Result<KafkaPayload> {
    let mut store = store.lock();
    match request {
        KafkaPayload::Send { key, msg } => Ok(KafkaPayload::SendOk {
            offset: store.send(&key, msg),
        }),
        KafkaPayload::Poll { offsets } => Ok(KafkaPayload::PollOk {
            msgs: store.poll(&offsets, poll_batch),
        }),
        KafkaPayload::CommitOffsets { offsets } => {
            store.commit(&offsets);
            Ok(KafkaPayload::CommitOffsetsOk)
        }
        KafkaPayload::ListCommittedOffsets { keys } => Ok(KafkaPayload::ListCommittedOffsetsOk {
            offsets: store.committed(&keys),
        }),
        other => Err(Error::NotSupported(format!("kafka cannot serve {other:?}"))),
    }
}
