//! In-process cluster for tests.
//!
//! Each node's outbox is drained by a router task that hands envelopes
//! straight to the destination's [`Node::dispatch`]. Delivery between two
//! nodes is ordered; links can be cut and healed to model partitions. A
//! client node (`c0`) issues requests the way Maelstrom's clients do.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    error::{Error, Result},
    kv::KvPayload,
    message::{Body, Message},
    node::{Node, Outbox},
};

pub const CLIENT_ID: &str = "c0";

const CLIENT_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Cluster {
    shared: Arc<Shared>,
    client: Node,
    members: Vec<String>,
    services: Vec<String>,
}

#[derive(Default)]
struct Shared {
    nodes: RwLock<HashMap<String, Node>>,
    cuts: RwLock<HashSet<(String, String)>>,
}

impl Shared {
    fn deliver(&self, message: Message) {
        let cut = self
            .cuts
            .read()
            .contains(&(message.src.clone(), message.dest.clone()));
        if cut {
            debug!(src = %message.src, dest = %message.dest, "dropped by partition");
            return;
        }

        let target = self.nodes.read().get(&message.dest).cloned();
        match target {
            Some(node) => node.dispatch(message),
            None => debug!(dest = %message.dest, "no such node"),
        }
    }
}

impl Cluster {
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());
        let client = attach(&shared, CLIENT_ID, |_| {});
        Self {
            shared,
            client,
            members: Vec::new(),
            services: Vec::new(),
        }
    }

    /// Adds a cluster member. `setup` registers its handlers before any
    /// traffic arrives.
    pub fn add_node(&mut self, id: &str, setup: impl FnOnce(&Node)) -> Node {
        self.members.push(id.to_string());
        attach(&self.shared, id, setup)
    }

    /// Adds an in-memory KV service under `name` (for example `seq-kv`).
    pub fn add_kv_service(&mut self, name: &str) -> Node {
        self.services.push(name.to_string());
        attach(&self.shared, name, serve_kv)
    }

    /// Sends `init` to every node and service and waits until each has
    /// acknowledged it.
    pub async fn start(&self) -> Result<()> {
        init(&self.client, CLIENT_ID, &self.members);
        for id in self.members.iter().chain(&self.services) {
            let body = Body::from_payload(&serde_json::json!({
                "type": "init",
                "node_id": id,
                "node_ids": self.members,
            }))?;
            self.client.rpc(id, body, CLIENT_TIMEOUT).await?;
        }
        Ok(())
    }

    pub fn client(&self) -> &Node {
        &self.client
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Sends a client request to `dest` and returns the reply.
    pub async fn request<T: Serialize>(&self, dest: &str, payload: &T) -> Result<Message> {
        let body = Body::from_payload(payload)?;
        self.client.rpc(dest, body, CLIENT_TIMEOUT).await
    }

    /// Cuts the link between `a` and `b` in both directions.
    pub fn partition(&self, a: &str, b: &str) {
        let mut cuts = self.shared.cuts.write();
        cuts.insert((a.to_string(), b.to_string()));
        cuts.insert((b.to_string(), a.to_string()));
    }

    pub fn heal(&self) {
        self.shared.cuts.write().clear();
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

fn attach(shared: &Arc<Shared>, id: &str, setup: impl FnOnce(&Node)) -> Node {
    let (node, outbox) = Node::new();
    setup(&node);
    shared.nodes.write().insert(id.to_string(), node.clone());
    spawn_router(Arc::clone(shared), outbox);
    node
}

fn spawn_router(shared: Arc<Shared>, mut outbox: Outbox) {
    tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            shared.deliver(message);
        }
    });
}

fn init(node: &Node, id: &str, members: &[String]) {
    let mut body = Body::new("init");
    body.fields.insert("node_id".into(), id.into());
    body.fields.insert("node_ids".into(), members.into());
    node.dispatch(Message {
        src: id.to_string(),
        dest: id.to_string(),
        body,
    });
}

/// Registers `read`, `write`, and `cas` handlers backed by a map, with the
/// same error codes as Maelstrom's own services.
pub fn serve_kv(node: &Node) {
    let store: Arc<Mutex<HashMap<String, Value>>> = Arc::default();
    for kind in ["read", "write", "cas"] {
        let store = Arc::clone(&store);
        node.handle(kind, move |_node, message| {
            let store = Arc::clone(&store);
            async move {
                let reply = apply_kv(&store, message.body.payload()?)?;
                Body::from_payload(&reply)
            }
        });
    }
}

fn apply_kv(store: &Mutex<HashMap<String, Value>>, request: KvPayload) -> Result<KvPayload> {
    let mut store = store.lock();
    match request {
        KvPayload::Read { key } => match store.get(&key) {
            Some(value) => Ok(KvPayload::ReadOk {
                value: value.clone(),
            }),
            None => Err(Error::KeyDoesNotExist(key)),
        },
        KvPayload::Write { key, value } => {
            store.insert(key, value);
            Ok(KvPayload::WriteOk)
        }
        KvPayload::Cas {
            key,
            from,
            to,
            create_if_not_exists,
        } => match store.get_mut(&key) {
            Some(current) if *current == from => {
                *current = to;
                Ok(KvPayload::CasOk)
            }
            Some(current) => Err(Error::PreconditionFailed(format!(
                "expected {from}, found {current}"
            ))),
            None if create_if_not_exists => {
                store.insert(key, to);
                Ok(KvPayload::CasOk)
            }
            None => Err(Error::KeyDoesNotExist(key)),
        },
        other => Err(Error::NotSupported(format!("kv cannot serve {other:?}"))),
    }
}
