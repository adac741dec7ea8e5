use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use futures::{stream::FuturesUnordered, StreamExt};
use tokio::{
    select,
    sync::watch,
    time::{sleep_until, Instant},
};
use tracing::{debug, debug_span, trace, warn, Instrument};

use crate::{
    config::RetryPolicy,
    error::{self, Error},
    transport::Transport,
    wire::{NodeId, Payload, Reply, Request},
};

/// How a single delivery ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The destination replied. `attempts` counts the requests sent.
    Acked { attempts: u32 },
    /// The destination answered with an `error` reply that a resend can't
    /// fix. Transient error codes are retried instead.
    Rejected { code: u32, text: String },
    /// The attempt cap was reached without any reply.
    GaveUp { attempts: u32 },
    /// The node shut down first.
    Cancelled,
}

/// Drives pending deliveries until the destination acknowledges them.
///
/// Every delivery runs on its own task, independent of all others. Attempts
/// are never abandoned once sent, so a slow reply to an earlier attempt still
/// completes the delivery.
///
/// Can be cloned to obtain another handle to the same manager.
#[derive(Clone)]
pub struct Retrier {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
    outstanding: Arc<AtomicUsize>,
}

impl Retrier {
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            policy,
            shutdown,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of deliveries that haven't finished yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Registers a delivery of `payload` to `dest` and returns immediately.
    pub fn deliver(&self, dest: NodeId, payload: Payload) {
        let span = debug_span!("delivery", dest = %dest, values = payload.values().len());
        let retrier = self.clone();
        let in_flight = InFlight::enter(self.outstanding.clone());
        tokio::spawn(
            async move {
                let _in_flight = in_flight;
                match retrier.drive(&dest, payload).await {
                    Outcome::Acked { attempts } => {
                        trace!(attempts, "delivery acknowledged");
                    }
                    Outcome::Rejected { code, text } => {
                        warn!("{} rejected delivery with code {}: {}", dest, code, text);
                    }
                    Outcome::GaveUp { attempts } => {
                        warn!("giving up on {} after {} unanswered attempts", dest, attempts);
                    }
                    Outcome::Cancelled => trace!("delivery cancelled by shutdown"),
                }
            }
            .instrument(span),
        );
    }

    /// Sends `payload` to `dest` every retry interval until a reply arrives,
    /// the attempt cap is hit, or the node shuts down.
    pub async fn drive(&self, dest: &str, payload: Payload) -> Outcome {
        let request = Request::from(payload);
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Outcome::Cancelled;
        }

        let mut in_flight = FuturesUnordered::new();
        let mut attempts = 0u32;
        let mut wait = self.policy.interval;
        let timer = sleep_until(Instant::now());
        tokio::pin!(timer);

        loop {
            select! {
                // a closed channel means the node is gone
                _ = shutdown.changed() => return Outcome::Cancelled,
                Some(result) = in_flight.next() => match result {
                    Ok(Reply::Error { code, text }) if error::is_transient(code) => {
                        debug!("{} is unavailable ({}): {}", dest, code, text);
                    }
                    Ok(Reply::Error { code, text }) => {
                        return Outcome::Rejected { code, text };
                    }
                    Ok(_) => return Outcome::Acked { attempts },
                    Err(e) => debug!("attempt to reach {} failed: {}", dest, e),
                },
                () = &mut timer => {
                    if self.policy.max_attempts.is_some_and(|max| attempts >= max) {
                        return Outcome::GaveUp { attempts };
                    }
                    attempts += 1;
                    trace!(attempt = attempts, "sending");
                    in_flight.push(self.attempt(dest, request.clone()));
                    timer.as_mut().reset(Instant::now() + wait);
                    wait = self.policy.next_interval(wait);
                }
            }
        }
    }

    fn attempt(
        &self,
        dest: &str,
        request: Request,
    ) -> impl Future<Output = Result<Reply, Error>> + Send + 'static {
        let transport = self.transport.clone();
        let dest = dest.to_owned();
        async move { transport.call(&dest, request).await }
    }
}

/// Counts a delivery as outstanding for as long as it's alive, including when
/// its task is aborted.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
