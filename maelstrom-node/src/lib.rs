//! A small runtime for Maelstrom nodes.
//!
//! Maelstrom runs each node as a process and talks to it over stdin/stdout,
//! one JSON envelope per line. This crate owns that plumbing so workloads only
//! register handlers and, when they need to, call peers:
//!
//! - [`message`] defines the envelope and body types plus the line framing.
//! - [`node`] holds identity, dispatches inbound messages to handlers on their
//!   own tasks, and provides `send`, `reply`, and deadline-bounded `rpc`.
//! - [`kv`] is a client for the `seq-kv` and `lin-kv` services.
//! - [`error`] maps failures onto Maelstrom's error codes.
//! - [`sim`] wires several nodes together in-process for tests.

pub mod error;
pub mod kv;
pub mod message;
pub mod node;
pub mod sim;

pub use error::{Error, Result};
pub use message::{Body, Message};
pub use node::{Node, Outbox};
