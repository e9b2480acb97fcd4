use maelstrom_node::{Body, Error, Node};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EchoPayload {
    Echo { echo: Value },
    EchoOk { echo: Value },
}

/// Answers every `echo` with the same payload.
pub fn register(node: &Node) {
    node.handle("echo", |_node, message| async move {
        let EchoPayload::Echo { echo } = message.body.payload()? else {
            return Err(Error::NotSupported("echo_ok is a reply".into()));
        };
        Body::from_payload(&EchoPayload::EchoOk { echo })
    });
}
