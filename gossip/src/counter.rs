//! Grow-only counter kept in Maelstrom's `seq-kv`.
//!
//! All nodes share one key. `add` is a compare-and-set loop against it;
//! `read` first writes a key of its own so the store cannot serve it a view
//! older than that write.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use maelstrom_node::{Body, Error, Node, Result, kv::Kv};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const COUNTER_KEY: &str = "counter";

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CounterPayload {
    Add { delta: i64 },
    AddOk,
    Read,
    ReadOk { value: i64 },
}

#[derive(Debug, Clone, Copy)]
pub struct CounterConfig {
    pub cas_retries: u32,
    pub kv_timeout: Duration,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            cas_retries: 3,
            kv_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Clone)]
pub struct Counter {
    node: Node,
    kv: Kv,
    cas_retries: u32,
}

impl Counter {
    pub fn new(node: Node, config: CounterConfig) -> Self {
        let kv = Kv::seq(node.clone(), config.kv_timeout);
        Self {
            node,
            kv,
            cas_retries: config.cas_retries,
        }
    }

    /// Adds `delta`, retrying lost compare-and-set races.
    pub async fn add(&self, delta: i64) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }

        for attempt in 1..=self.cas_retries {
            let current = self.current().await?;
            let next = current.checked_add(delta).ok_or_else(|| {
                Error::MalformedRequest(format!("adding {delta} to {current} overflows"))
            })?;
            match self.kv.cas(COUNTER_KEY, &current, &next, true).await {
                Ok(()) => return Ok(()),
                Err(Error::PreconditionFailed(reason)) => {
                    debug!(attempt, %reason, "counter moved underneath us");
                }
                Err(error) => return Err(error),
            }
        }

        Err(Error::TemporarilyUnavailable(format!(
            "add {delta} lost {} compare-and-set attempts",
            self.cas_retries
        )))
    }

    pub async fn read(&self) -> Result<i64> {
        self.barrier().await?;
        self.current().await
    }

    async fn current(&self) -> Result<i64> {
        match self.kv.read(COUNTER_KEY).await {
            Ok(value) => Ok(value),
            Err(Error::KeyDoesNotExist(_)) => Ok(0),
            Err(error) => Err(error),
        }
    }

    async fn barrier(&self) -> Result<()> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        self.kv
            .write(&format!("barrier-{}", self.node.id()), &stamp)
            .await
    }
}

pub fn register(node: &Node, config: CounterConfig) -> Counter {
    let counter = Counter::new(node.clone(), config);
    for kind in ["add", "read"] {
        let counter = counter.clone();
        node.handle(kind, move |_node, message| {
            let counter = counter.clone();
            async move {
                let reply = match message.body.payload()? {
                    CounterPayload::Add { delta } => {
                        counter.add(delta).await?;
                        CounterPayload::AddOk
                    }
                    CounterPayload::Read => CounterPayload::ReadOk {
                        value: counter.read().await?,
                    },
                    _ => {
                        return Err(Error::NotSupported(format!(
                            "{} is a reply",
                            message.body.kind
                        )));
                    }
                };
                Body::from_payload(&reply)
            }
        });
    }
    counter
}
