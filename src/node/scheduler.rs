use std::{mem, sync::Arc, time::Duration};

use hashbrown::HashSet;
use tokio::{
    select,
    sync::{mpsc, watch, Mutex},
    time::MissedTickBehavior,
};
use tracing::{debug, debug_span, trace, Instrument};

use super::{retry::Retrier, topology::Topology};
use crate::{
    config::Strategy,
    wire::{NodeId, Payload, Value},
};

/// A value waiting in the batch buffer, with the neighbor it came from.
struct Buffered {
    value: Value,
    from: Option<NodeId>,
}

/// A fan-out that arrived before the topology did.
struct Deferred {
    payload: Payload,
    from: Option<NodeId>,
}

enum Mode {
    Immediate { deferred: Mutex<Vec<Deferred>> },
    Batched { buffer: mpsc::UnboundedSender<Buffered> },
}

/// Turns newly learned values into deliveries to neighbors.
pub struct Scheduler {
    mode: Mode,
    topology: Topology,
    retrier: Retrier,
}

impl Scheduler {
    /// Must be called from within a tokio runtime: the batched strategy spawns
    /// its flush task here.
    pub fn new(
        strategy: Strategy,
        topology: Topology,
        retrier: Retrier,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let mode = match strategy {
            Strategy::Immediate => Mode::Immediate {
                deferred: Mutex::new(Vec::new()),
            },
            Strategy::Batched { flush_interval } => {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(
                    flush(rx, topology.clone(), retrier.clone(), flush_interval, shutdown)
                        .instrument(debug_span!("flush")),
                );
                Mode::Batched { buffer: tx }
            }
        };
        Self {
            mode,
            topology,
            retrier,
        }
    }

    /// Schedules `payload` for every neighbor except `from`.
    pub async fn schedule(&self, payload: Payload, from: Option<&str>) {
        match &self.mode {
            Mode::Immediate { deferred } => {
                // checking the topology under the lock keeps `activate` from
                // draining the queue between the check and the push
                let mut deferred = deferred.lock().await;
                match self.topology.configured().await {
                    Some(neighbors) => {
                        drop(deferred);
                        self.fan_out(&neighbors, payload, from);
                    }
                    None => {
                        trace!("no topology yet, holding {} values", payload.values().len());
                        deferred.push(Deferred {
                            payload,
                            from: from.map(str::to_owned),
                        });
                    }
                }
            }
            Mode::Batched { buffer } => {
                for &value in payload.values() {
                    let entry = Buffered {
                        value,
                        from: from.map(str::to_owned),
                    };
                    if buffer.send(entry).is_err() {
                        trace!("flush task has stopped, dropping buffered values");
                        break;
                    }
                }
            }
        }
    }

    /// Releases fan-outs held back while the node had no topology. Call after
    /// every `Topology::set_neighbors`.
    pub async fn activate(&self) {
        if let Mode::Immediate { deferred } = &self.mode {
            let mut deferred = deferred.lock().await;
            let held = mem::take(&mut *deferred);
            if held.is_empty() {
                return;
            }
            let neighbors = self.topology.neighbors().await;
            debug!("releasing {} deferred deliveries", held.len());
            for Deferred { payload, from } in held {
                self.fan_out(&neighbors, payload, from.as_deref());
            }
        }
    }

    fn fan_out(&self, neighbors: &[NodeId], payload: Payload, from: Option<&str>) {
        for neighbor in neighbors.iter().filter(|n| Some(n.as_str()) != from) {
            trace!("forwarding {} values to {}", payload.values().len(), neighbor);
            self.retrier.deliver(neighbor.clone(), payload.clone());
        }
    }
}

/// Drains the batch buffer every `interval` and hands one batch per neighbor
/// to the retrier. Values stay buffered while the node has no topology.
async fn flush(
    mut buffer: mpsc::UnboundedReceiver<Buffered>,
    topology: Topology,
    retrier: Retrier,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut held = Vec::new();
    loop {
        select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                while let Ok(entry) = buffer.try_recv() {
                    held.push(entry);
                }
                if held.is_empty() {
                    continue;
                }
                let Some(neighbors) = topology.configured().await else {
                    trace!("no topology yet, keeping {} values buffered", held.len());
                    continue;
                };
                let entries = mem::take(&mut held);
                debug!("flushing {} values to {} neighbors", entries.len(), neighbors.len());
                for neighbor in neighbors.iter() {
                    let batch = batch_for(&entries, neighbor);
                    if !batch.is_empty() {
                        retrier.deliver(neighbor.clone(), Payload::Batch(batch));
                    }
                }
            }
        }
    }
    trace!("flush task stopped");
}

/// The distinct buffered values `neighbor` didn't send us, in arrival order.
fn batch_for(entries: &[Buffered], neighbor: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter(|entry| entry.from.as_deref() != Some(neighbor))
        .map(|entry| entry.value)
        .filter(|value| seen.insert(*value))
        .collect()
}
