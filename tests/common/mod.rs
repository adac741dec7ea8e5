#![allow(dead_code)]

use std::sync::Arc;

use epidemic::{transport::mem::Network, Config, NodeId, Value};
use hashbrown::HashMap;

pub fn ids(n: usize) -> Vec<NodeId> {
    (0..n).map(|i| format!("n{i}")).collect()
}

/// Builds an adjacency map from `(node, neighbors)` pairs.
pub fn topology(entries: &[(&str, &[&str])]) -> HashMap<NodeId, Vec<NodeId>> {
    entries
        .iter()
        .map(|(node, neighbors)| {
            let neighbors = neighbors.iter().map(|n| n.to_string()).collect();
            (node.to_string(), neighbors)
        })
        .collect()
}

/// `n0 - n1 - ... - n{k}`
pub fn line(ids: &[NodeId]) -> HashMap<NodeId, Vec<NodeId>> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let mut neighbors = Vec::new();
            if i > 0 {
                neighbors.push(ids[i - 1].clone());
            }
            if i + 1 < ids.len() {
                neighbors.push(ids[i + 1].clone());
            }
            (id.clone(), neighbors)
        })
        .collect()
}

/// Every node is every other node's neighbor.
pub fn total(ids: &[NodeId]) -> HashMap<NodeId, Vec<NodeId>> {
    ids.iter()
        .map(|id| {
            let others = ids.iter().filter(|other| *other != id).cloned().collect();
            (id.clone(), others)
        })
        .collect()
}

/// Starts a cluster of `n` nodes and hands each one `topology`.
pub async fn cluster(
    n: usize,
    config: &Config,
    topology: impl Fn(&[NodeId]) -> HashMap<NodeId, Vec<NodeId>>,
) -> Arc<Network> {
    let network = Network::new(ids(n));
    network.start(config).unwrap();
    network.configure(&topology(network.ids())).await;
    network
}

pub async fn sorted_read(network: &Network, id: &str) -> Vec<Value> {
    let node = network.node(id).expect("no such node");
    let mut values = node.read().await;
    values.sort_unstable();
    values
}
