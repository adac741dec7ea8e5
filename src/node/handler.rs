use serde_json::Value as Json;
use tracing::{debug, debug_span, trace, warn, Instrument};

use super::Node;
use crate::{
    config::BatchForwarding,
    error::Error,
    wire::{NodeId, Payload, Reply, Request, Value},
};

impl Node {
    /// Decodes and serves one inbound message body from `src`.
    ///
    /// An `Err` is meant to go back to `src` as an `error` reply. It never
    /// touches the node's state.
    pub async fn dispatch(&self, src: &str, body: Json) -> Result<Reply, Error> {
        let request = match Request::decode(body) {
            Ok(request) => request,
            Err(e) => {
                warn!("rejecting message from {}: {}", src, e);
                return Err(e);
            }
        };
        Ok(self.handle(src, request).await)
    }

    /// Serves one request from `src`. Returns as soon as the request's effect
    /// on local state is recorded; forwarding carries on in the background.
    pub async fn handle(&self, src: &str, request: Request) -> Reply {
        let span = debug_span!("handle", node = %self.id, src = %src);
        async move {
            match request {
                Request::Broadcast { message } => {
                    self.on_broadcast(src, message).await;
                    Reply::BroadcastOk
                }
                Request::BroadcastBatch { message } => {
                    self.on_broadcast_batch(src, message).await;
                    Reply::BroadcastBatchOk
                }
                Request::Read => Reply::ReadOk {
                    messages: self.read().await,
                },
                Request::Topology { mut topology } => {
                    // a node missing from the map simply has no neighbors
                    let neighbors = topology.remove(&self.id).unwrap_or_default();
                    self.configure(neighbors).await;
                    Reply::TopologyOk
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn on_broadcast(&self, src: &str, value: Value) {
        if !self.store.add(value).await {
            trace!("already knew {}", value);
            return;
        }
        debug!("learned {}", value);
        self.scheduler
            .schedule(Payload::Single(value), Some(src))
            .await;
    }

    async fn on_broadcast_batch(&self, src: &str, values: Vec<Value>) {
        let novel = self.store.add_all(&values).await;
        if novel.is_empty() {
            trace!("already knew all {} values", values.len());
            return;
        }
        debug!("learned {} of {} values", novel.len(), values.len());
        let forward = match self.config.batch_forwarding {
            BatchForwarding::Full => values,
            BatchForwarding::Novel => novel,
        };
        self.scheduler
            .schedule(Payload::Batch(forward), Some(src))
            .await;
    }

    async fn configure(&self, neighbors: Vec<NodeId>) {
        debug!("neighbors are now {:?}", neighbors);
        self.topology.set_neighbors(neighbors).await;
        self.scheduler.activate().await;
    }
}
