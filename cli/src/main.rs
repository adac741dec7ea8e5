use std::{process::ExitCode, time::Duration};

use clap::{Parser, ValueEnum};
use epidemic::{transport::stdio, BatchForwarding, Config, RetryPolicy, Strategy};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    Immediate,
    Batched,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ForwardArg {
    Full,
    Novel,
}

/// Epidemic broadcast node speaking line-delimited JSON on stdin/stdout.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// How new values are sent on to neighbors.
    #[arg(long, value_enum, default_value = "immediate")]
    strategy: StrategyArg,

    /// Flush period of the batched strategy.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    flush_interval_ms: u64,

    /// Wait before resending an unacknowledged delivery.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    retry_interval_ms: u64,

    /// Double the retry wait after every attempt, up to this many milliseconds.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    max_retry_interval_ms: Option<u64>,

    /// Abandon a delivery after this many unanswered attempts.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: Option<u32>,

    /// What to re-forward after a batch that contained new values.
    #[arg(long, value_enum, default_value = "full")]
    forward: ForwardArg,
}

impl Args {
    fn config(&self) -> Config {
        let strategy = match self.strategy {
            StrategyArg::Immediate => Strategy::Immediate,
            StrategyArg::Batched => Strategy::Batched {
                flush_interval: Duration::from_millis(self.flush_interval_ms),
            },
        };
        let retry = RetryPolicy {
            interval: Duration::from_millis(self.retry_interval_ms),
            max_interval: self.max_retry_interval_ms.map(Duration::from_millis),
            max_attempts: self.max_attempts,
        };
        let batch_forwarding = match self.forward {
            ForwardArg::Full => BatchForwarding::Full,
            ForwardArg::Novel => BatchForwarding::Novel,
        };
        Config::builder()
            .strategy(strategy)
            .retry(retry)
            .batch_forwarding(batch_forwarding)
            .build()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match stdio::run(args.config()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("node stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
