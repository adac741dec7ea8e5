// An in-process cluster. Every node gets its own `MemTransport`, and a call is
// served by invoking the destination node's handler directly. Faults are
// injected per directed link: a lost request or a lost reply leaves the
// caller's future pending forever, exactly like a message dropped on a real
// network.

use std::{
    future,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tracing::trace;

use super::Transport;
use crate::{
    config::Config,
    error::Error,
    node::Node,
    wire::{NodeId, Reply, Request},
};

/// A request as seen by the network, whether or not it arrived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub from: NodeId,
    pub to: NodeId,
    pub request: Request,
    pub delivered: bool,
}

#[derive(Default)]
struct Faults {
    drop_first: HashMap<(NodeId, NodeId), u32>,
    severed: HashSet<(NodeId, NodeId)>,
    drop_rate: f64,
}

pub struct Network {
    ids: Vec<NodeId>,
    nodes: RwLock<HashMap<NodeId, Node>>,
    faults: Mutex<Faults>,
    calls: Mutex<Vec<Call>>,
}

impl Network {
    pub fn new<I, S>(ids: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        Arc::new(Self {
            ids: ids.into_iter().map(Into::into).collect(),
            nodes: RwLock::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Starts a node for every member, replacing any started before. Must be
    /// called from within a tokio runtime.
    pub fn start(self: &Arc<Self>, config: &Config) -> Result<Vec<Node>, Error> {
        let nodes = self
            .ids
            .iter()
            .map(|id| {
                let transport = Arc::new(MemTransport {
                    id: id.clone(),
                    ids: self.ids.clone(),
                    network: Arc::downgrade(self),
                });
                Node::new(transport, config.clone())
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut registry = self.nodes.write();
        for node in &nodes {
            registry.insert(node.id().to_owned(), node.clone());
        }
        Ok(nodes)
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        self.nodes.read().get(id).cloned()
    }

    /// Sends `topology` to every node, as a client would.
    pub async fn configure(&self, topology: &HashMap<NodeId, Vec<NodeId>>) {
        let nodes: Vec<Node> = self.nodes.read().values().cloned().collect();
        for node in nodes {
            let request = Request::Topology {
                topology: topology.clone(),
            };
            node.handle("c0", request).await;
        }
    }

    /// Loses the next `n` requests sent from `from` to `to`.
    pub fn drop_first(&self, from: &str, to: &str, n: u32) {
        self.faults
            .lock()
            .drop_first
            .insert((from.to_owned(), to.to_owned()), n);
    }

    /// Loses every request from `from` to `to` and every reply from `to`
    /// back to `from` until healed.
    pub fn sever(&self, from: &str, to: &str) {
        self.faults
            .lock()
            .severed
            .insert((from.to_owned(), to.to_owned()));
    }

    pub fn heal(&self, from: &str, to: &str) {
        self.faults
            .lock()
            .severed
            .remove(&(from.to_owned(), to.to_owned()));
    }

    /// Loses each request and each reply independently with probability
    /// `rate`, clamped to `[0, 1]`.
    pub fn set_drop_rate(&self, rate: f64) {
        self.faults.lock().drop_rate = rate.clamp(0.0, 1.0);
    }

    /// Every request sent so far, in send order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_between(&self, from: &str, to: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.from == from && call.to == to)
            .cloned()
            .collect()
    }

    pub fn shutdown(&self) {
        for node in self.nodes.read().values() {
            node.shutdown();
        }
    }

    /// Decides whether a request from `from` reaches `to`.
    fn admit_request(&self, from: &str, to: &str) -> bool {
        let mut faults = self.faults.lock();
        let link = (from.to_owned(), to.to_owned());
        if faults.severed.contains(&link) {
            return false;
        }
        if let Some(remaining) = faults.drop_first.get_mut(&link) {
            if *remaining > 0 {
                *remaining -= 1;
                return false;
            }
        }
        !lost(faults.drop_rate)
    }

    /// Decides whether the reply to a request from `from` makes it back.
    fn admit_reply(&self, from: &str, to: &str) -> bool {
        let faults = self.faults.lock();
        if faults.severed.contains(&(from.to_owned(), to.to_owned())) {
            return false;
        }
        !lost(faults.drop_rate)
    }
}

fn lost(rate: f64) -> bool {
    rate > 0.0 && rand::thread_rng().gen_bool(rate)
}

/// One node's view of a `Network`.
pub struct MemTransport {
    id: NodeId,
    ids: Vec<NodeId>,
    network: Weak<Network>,
}

#[async_trait]
impl Transport for MemTransport {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn node_ids(&self) -> &[NodeId] {
        &self.ids
    }

    async fn call(&self, dest: &str, request: Request) -> Result<Reply, Error> {
        let network = self.network.upgrade().ok_or(Error::TransportClosed)?;
        let delivered = network.admit_request(&self.id, dest);
        network.calls.lock().push(Call {
            from: self.id.clone(),
            to: dest.to_owned(),
            request: request.clone(),
            delivered,
        });
        let node = if delivered { network.node(dest) } else { None };
        let Some(node) = node else {
            trace!("request from {} to {} lost", self.id, dest);
            drop(network);
            return future::pending().await;
        };
        drop(network);

        let reply = node.handle(&self.id, request).await;

        let returned = self
            .network
            .upgrade()
            .is_some_and(|network| network.admit_reply(&self.id, dest));
        if !returned {
            trace!("reply from {} to {} lost", dest, self.id);
            return future::pending().await;
        }
        Ok(reply)
    }
}
