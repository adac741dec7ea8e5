// The transport is everything underneath a node: who it is, who else is in
// the cluster, and how a request reaches a peer and its reply comes back.
// Nodes never retry or time out at this layer. A call either resolves with
// the peer's reply or stays pending forever, and the delivery manager above it
// decides when to try again.

use async_trait::async_trait;

use crate::{
    error::Error,
    wire::{NodeId, Reply, Request},
};

pub mod mem;
#[cfg(feature = "stdio")]
pub mod stdio;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// This node's identifier.
    fn node_id(&self) -> &str;

    /// Every node in the cluster, this one included.
    fn node_ids(&self) -> &[NodeId];

    /// Sends `request` to `dest` and resolves with the correlated reply.
    ///
    /// Lost requests and lost replies leave the future pending. Dropping the
    /// future abandons the correlation.
    async fn call(&self, dest: &str, request: Request) -> Result<Reply, Error>;
}
