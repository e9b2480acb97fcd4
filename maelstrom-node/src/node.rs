//! The node runtime: identity, handler dispatch, replies, and RPC.
//!
//! A [`Node`] is a cheap handle around shared state. Every inbound request is
//! handled on its own Tokio task, so handlers may run concurrently with each
//! other and with any background tasks a workload spawns. Outbound envelopes
//! go through a single unbounded channel ([`Outbox`]) that [`Node::serve`]
//! drains to stdout, or that a test router drains to other nodes.

use std::{
    collections::HashMap,
    future::Future,
    io,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::{FutureExt, future::BoxFuture};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    sync::{mpsc, oneshot},
};
use tracing::{debug, info, trace, warn};

use crate::{
    error::{Error, Result},
    message::{Body, Message, read_message, write_message},
};

/// Envelopes this node wants delivered.
pub type Outbox = mpsc::UnboundedReceiver<Message>;

type Handler = Arc<dyn Fn(Node, Message) -> BoxFuture<'static, Result<Body>> + Send + Sync>;

#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    identity: OnceLock<Identity>,
    next_msg_id: AtomicU64,
    handlers: RwLock<HashMap<String, Handler>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
    outbound: mpsc::UnboundedSender<Message>,
}

struct Identity {
    id: String,
    node_ids: Vec<String>,
}

#[derive(Deserialize)]
struct InitPayload {
    node_id: String,
    node_ids: Vec<String>,
}

impl Node {
    /// Creates a node that has not yet seen `init`, plus the receiving end of
    /// its outbound channel.
    pub fn new() -> (Self, Outbox) {
        let (outbound, outbox) = mpsc::unbounded_channel();
        let node = Self {
            inner: Arc::new(NodeInner {
                identity: OnceLock::new(),
                next_msg_id: AtomicU64::new(1),
                handlers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                outbound,
            }),
        };
        (node, outbox)
    }

    /// This node's id, or an empty string before `init` arrives.
    pub fn id(&self) -> &str {
        self.inner
            .identity
            .get()
            .map(|identity| identity.id.as_str())
            .unwrap_or_default()
    }

    /// Every node in the cluster, including this one.
    pub fn node_ids(&self) -> &[String] {
        self.inner
            .identity
            .get()
            .map(|identity| identity.node_ids.as_slice())
            .unwrap_or_default()
    }

    /// Registers the handler for one message type. The value it returns is
    /// sent back as the reply; an error becomes a Maelstrom `error` body.
    pub fn handle<F, Fut>(&self, kind: impl Into<String>, handler: F)
    where
        F: Fn(Node, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Body>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |node, message| handler(node, message).boxed());
        self.inner.handlers.write().insert(kind.into(), handler);
    }

    /// Routes one inbound envelope.
    ///
    /// Replies complete the matching pending RPC, `init` is answered inline,
    /// and everything else runs its handler on a fresh task. Requests without a
    /// `msg_id` are one-way and never get a reply.
    pub fn dispatch(&self, message: Message) {
        trace!(src = %message.src, kind = %message.body.kind, "inbound");

        if let Some(reply_to) = message.body.in_reply_to {
            self.complete(reply_to, message);
            return;
        }

        if message.body.kind == "init" {
            self.init(message);
            return;
        }

        let handler = self.inner.handlers.read().get(&message.body.kind).cloned();
        let Some(handler) = handler else {
            warn!(src = %message.src, kind = %message.body.kind, "no handler registered");
            if let Some(msg_id) = message.body.msg_id {
                let error = Error::NotSupported(format!("no handler for {}", message.body.kind));
                self.respond(&message.src, msg_id, error.to_body());
            }
            return;
        };

        let node = self.clone();
        tokio::spawn(async move {
            let src = message.src.clone();
            let kind = message.body.kind.clone();
            let msg_id = message.body.msg_id;

            let body = match handler(node.clone(), message).await {
                Ok(body) => body,
                Err(error) => {
                    warn!(%src, %kind, %error, "handler failed");
                    error.to_body()
                }
            };

            if let Some(msg_id) = msg_id {
                node.respond(&src, msg_id, body);
            }
        });
    }

    /// Sends a one-way message. The body goes out without a `msg_id`, so the
    /// receiver does not answer.
    pub fn send(&self, dest: &str, mut body: Body) -> Result<()> {
        body.msg_id = None;
        self.push(dest, body)
    }

    /// Answers `request` with `body`.
    pub fn reply(&self, request: &Message, body: Body) -> Result<()> {
        let msg_id = request
            .body
            .msg_id
            .ok_or_else(|| Error::MalformedRequest("cannot reply to a message without msg_id".into()))?;
        let mut body = body;
        body.in_reply_to = Some(msg_id);
        body.msg_id = Some(self.next_msg_id());
        self.push(&request.src, body)
    }

    /// Sends `body` to `dest` and waits up to `timeout` for the reply.
    ///
    /// An `error` reply is returned as the matching [`Error`]. Dropping the
    /// returned future abandons the call and forgets the pending entry.
    pub async fn rpc(&self, dest: &str, mut body: Body, timeout: Duration) -> Result<Message> {
        let msg_id = self.next_msg_id();
        body.msg_id = Some(msg_id);

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(msg_id, tx);
        let _pending = PendingGuard {
            node: self,
            msg_id,
        };

        self.push(dest, body)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) if reply.body.is_error() => Err(Error::from_body(&reply.body)),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => Err(Error::Timeout(format!(
                "no reply from {dest} within {timeout:?}"
            ))),
        }
    }

    /// Runs the node against a line-delimited JSON stream until the reader
    /// hits EOF.
    ///
    /// Lines that are not valid envelopes are logged and skipped.
    pub async fn serve<R, W>(&self, reader: R, writer: W, mut outbox: Outbox) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(message) = outbox.recv().await {
                write_message(&mut writer, &message).await?;
            }
            Ok::<_, io::Error>(())
        });

        let mut reader = reader;
        let result = loop {
            match read_message::<_, Message>(&mut reader).await {
                Ok(Some(message)) => self.dispatch(message),
                Ok(None) => break Ok(()),
                Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                    warn!(error = %err, "skipping unparseable line");
                }
                Err(err) => break Err(err),
            }
        };

        writer_task.abort();
        result
    }

    fn init(&self, message: Message) {
        let body = match message.body.payload::<InitPayload>() {
            Ok(InitPayload { node_id, node_ids }) => {
                info!(node = %node_id, cluster = node_ids.len(), "node initialised");
                let identity = Identity {
                    id: node_id,
                    node_ids,
                };
                if self.inner.identity.set(identity).is_err() {
                    warn!("init received twice; keeping the first identity");
                }
                Body::new("init_ok")
            }
            Err(error) => error.to_body(),
        };

        if let Some(msg_id) = message.body.msg_id {
            self.respond(&message.src, msg_id, body);
        }
    }

    fn complete(&self, reply_to: u64, message: Message) {
        let waiter = self.inner.pending.lock().remove(&reply_to);
        match waiter {
            Some(waiter) => {
                // The caller may have timed out in the meantime.
                let _ = waiter.send(message);
            }
            None => debug!(src = %message.src, reply_to, "reply with no pending request"),
        }
    }

    fn respond(&self, dest: &str, msg_id: u64, mut body: Body) {
        body.in_reply_to = Some(msg_id);
        body.msg_id = Some(self.next_msg_id());
        if let Err(error) = self.push(dest, body) {
            debug!(%dest, %error, "dropping reply");
        }
    }

    fn push(&self, dest: &str, body: Body) -> Result<()> {
        let message = Message {
            src: self.id().to_string(),
            dest: dest.to_string(),
            body,
        };
        self.inner.outbound.send(message).map_err(|_| Error::Closed)
    }

    fn next_msg_id(&self) -> u64 {
        self.inner.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }
}

struct PendingGuard<'a> {
    node: &'a Node,
    msg_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.node.inner.pending.lock().remove(&self.msg_id);
    }
}
