//! Epidemic broadcast of integer values across a cluster of nodes.
//!
//! Each [`Node`] keeps a grow-only set of values and forwards every value it
//! learns to its neighbors until they acknowledge it. Nodes talk through a
//! [`Transport`]: [`transport::stdio`] speaks line-delimited JSON on stdin and
//! stdout, and [`transport::mem`] runs a whole cluster inside one process.

pub mod config;
pub mod error;
pub mod node;
pub mod transport;
pub mod wire;

pub use config::{BatchForwarding, Config, RetryPolicy, Strategy};
pub use error::{Error, Result};
pub use node::{Node, NodeState};
pub use transport::Transport;
pub use wire::{NodeId, Payload, Reply, Request, Value};
