//! Client for Maelstrom's built-in key/value services (`seq-kv`, `lin-kv`).

use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    error::{Error, Result},
    message::Body,
    node::Node,
};

pub const SEQ_KV: &str = "seq-kv";
pub const LIN_KV: &str = "lin-kv";

/// Request and reply bodies understood by the KV services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KvPayload {
    Read {
        key: String,
    },
    ReadOk {
        value: Value,
    },
    Write {
        key: String,
        value: Value,
    },
    WriteOk,
    Cas {
        key: String,
        from: Value,
        to: Value,
        #[serde(default)]
        create_if_not_exists: bool,
    },
    CasOk,
}

#[derive(Clone)]
pub struct Kv {
    node: Node,
    service: String,
    timeout: Duration,
}

impl Kv {
    pub fn new(node: Node, service: impl Into<String>, timeout: Duration) -> Self {
        Self {
            node,
            service: service.into(),
            timeout,
        }
    }

    /// Sequentially consistent store.
    pub fn seq(node: Node, timeout: Duration) -> Self {
        Self::new(node, SEQ_KV, timeout)
    }

    /// Linearizable store.
    pub fn lin(node: Node, timeout: Duration) -> Self {
        Self::new(node, LIN_KV, timeout)
    }

    /// Reads `key`. A missing key is [`Error::KeyDoesNotExist`].
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let reply = self
            .call(KvPayload::Read {
                key: key.to_string(),
            })
            .await?;
        match reply {
            KvPayload::ReadOk { value } => serde_json::from_value(value).map_err(Error::malformed),
            other => Err(unexpected(other)),
        }
    }

    pub async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(Error::malformed)?;
        match self
            .call(KvPayload::Write {
                key: key.to_string(),
                value,
            })
            .await?
        {
            KvPayload::WriteOk => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Replaces `from` with `to`. A stale `from` is
    /// [`Error::PreconditionFailed`].
    pub async fn cas<T: Serialize>(
        &self,
        key: &str,
        from: &T,
        to: &T,
        create_if_not_exists: bool,
    ) -> Result<()> {
        let from = serde_json::to_value(from).map_err(Error::malformed)?;
        let to = serde_json::to_value(to).map_err(Error::malformed)?;
        match self
            .call(KvPayload::Cas {
                key: key.to_string(),
                from,
                to,
                create_if_not_exists,
            })
            .await?
        {
            KvPayload::CasOk => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn call(&self, request: KvPayload) -> Result<KvPayload> {
        let body = Body::from_payload(&request)?;
        let reply = self.node.rpc(&self.service, body, self.timeout).await?;
        reply.body.payload()
    }
}

fn unexpected(reply: KvPayload) -> Error {
    Error::Crash(format!("unexpected kv reply: {reply:?}"))
}
