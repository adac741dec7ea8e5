// A node learns values from clients and neighbors, remembers them forever, and
// passes every value it hasn't seen before on to each neighbor except the one
// it came from. Neighbors do the same, so a value spreads until every
// reachable node has it. Duplicates stop the spread: a value a node already
// knows is acknowledged but never forwarded again.

// Inbound handling never waits on the network. Each value a node owes a
// neighbor becomes a delivery owned by its own task, which resends on a fixed
// interval until the neighbor replies. The replicated state is a grow-only
// set, so deliveries may be reordered, duplicated or retried any number of
// times without changing the outcome.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    config::Config,
    error::Result,
    transport::Transport,
    wire::{NodeId, Value},
};

mod handler;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod topology;

pub use retry::{Outcome, Retrier};
pub use scheduler::Scheduler;
pub use store::KnownValues;
pub use topology::{NodeState, Topology};

/// One member of the cluster.
///
/// Can be cloned to obtain another handle to the same node.
#[derive(Clone)]
pub struct Node {
    id: NodeId,
    config: Config,
    store: KnownValues,
    topology: Topology,
    scheduler: Arc<Scheduler>,
    retrier: Retrier,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Node {
    /// Builds a node on top of `transport`, rejecting an invalid `config`.
    /// Must be called from within a tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, config: Config) -> Result<Self> {
        config.validate()?;
        let id = transport.node_id().to_owned();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let topology = Topology::new();
        let retrier = Retrier::new(transport, config.retry.clone(), shutdown_rx.clone());
        let scheduler = Scheduler::new(
            config.strategy,
            topology.clone(),
            retrier.clone(),
            shutdown_rx,
        );
        Ok(Self {
            id,
            config,
            store: KnownValues::new(),
            topology,
            scheduler: Arc::new(scheduler),
            retrier,
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &KnownValues {
        &self.store
    }

    pub async fn state(&self) -> NodeState {
        self.topology.state().await
    }

    pub async fn neighbors(&self) -> Arc<[NodeId]> {
        self.topology.neighbors().await
    }

    /// Every value this node knows, in no particular order.
    pub async fn read(&self) -> Vec<Value> {
        self.store.snapshot().await
    }

    /// Number of deliveries still waiting for an acknowledgment.
    pub fn outstanding(&self) -> usize {
        self.retrier.outstanding()
    }

    /// Stops every retry loop and the batch flush task. Inbound messages are
    /// still answered, but nothing new is forwarded.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
