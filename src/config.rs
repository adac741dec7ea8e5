use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::error::{Error, Result};

/// How newly learned values are turned into deliveries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    /// One delivery per value per neighbor, issued as soon as the value is
    /// learned.
    #[default]
    Immediate,
    /// Values are buffered and flushed as one batch per neighbor every
    /// `flush_interval`.
    Batched { flush_interval: Duration },
}

impl Strategy {
    pub fn batched() -> Self {
        Strategy::Batched {
            flush_interval: Duration::from_secs(1),
        }
    }
}

/// What a node re-forwards after an inbound batch that taught it something.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BatchForwarding {
    /// The whole inbound batch, including values that were already known.
    #[default]
    Full,
    /// Only the values that were new to this node.
    Novel,
}

#[derive(TypedBuilder, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait between the first attempt and the second.
    #[builder(default = Duration::from_secs(1))]
    pub interval: Duration,
    /// When set, the wait doubles after every attempt up to this cap.
    #[builder(default, setter(strip_option))]
    pub max_interval: Option<Duration>,
    /// When set, a delivery is abandoned after this many unanswered attempts.
    #[builder(default, setter(strip_option))]
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Returns the wait that follows an attempt which was itself preceded by
    /// `current`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        match self.max_interval {
            Some(cap) => current.saturating_mul(2).min(cap.max(self.interval)),
            None => self.interval,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::InvalidConfig("retry interval must be non-zero"));
        }
        if self.max_interval.is_some_and(|cap| cap < self.interval) {
            return Err(Error::InvalidConfig(
                "max retry interval must not be below the retry interval",
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(Error::InvalidConfig("max attempts must be at least 1"));
        }
        Ok(())
    }
}

#[derive(TypedBuilder, Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    #[builder(default)]
    pub strategy: Strategy,
    #[builder(default)]
    pub retry: RetryPolicy,
    #[builder(default)]
    pub batch_forwarding: BatchForwarding,
}

impl Config {
    /// Rejects settings that would stall dissemination: zero periods spin or
    /// panic inside the timers that drive retries and flushes.
    pub fn validate(&self) -> Result<()> {
        if let Strategy::Batched { flush_interval } = self.strategy {
            if flush_interval.is_zero() {
                return Err(Error::InvalidConfig("flush interval must be non-zero"));
            }
        }
        self.retry.validate()
    }
}
