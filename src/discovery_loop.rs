//! The reconcile loop: fetch, project, publish, repeat.
//!
//! One cycle runs to completion before the next tick is considered; there is
//! no overlap and no concurrent API access. Retry policy lives here and only
//! here, the layers below classify failures and return them.

use std::time::Duration;

use crossbeam_channel::Receiver;
use slog::{error, info, warn, Logger};

use crate::config_writer::ConfigWriter;
use crate::prometheus_config::target_groups;
use crate::rancher::{AuthContext, DiscoveryError};

/// Counts consecutive failed cycles against the configured maximum. Any
/// successful cycle resets the budget.
struct RetryBudget {
    failures: u32,
    max_retry: u32,
}

impl RetryBudget {
    fn new(max_retry: u32) -> Self {
        Self {
            failures: 0,
            max_retry,
        }
    }

    /// Records a retryable failure; returns true when the budget is spent.
    fn record_failure(&mut self) -> bool {
        self.failures += 1;
        self.failures >= self.max_retry
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}

enum CycleError {
    /// Terminates the loop immediately, no matter the retry budget.
    Fatal(DiscoveryError),
    /// Counts against the retry budget; the previously published document
    /// stays authoritative.
    Retryable(String),
}

/// Drives discovery until the stop signal fires (clean shutdown), the
/// credentials are rejected, or the retry budget is exhausted.
///
/// The first cycle runs after one full interval, matching the cadence of
/// every later cycle.
pub async fn run_discovery_loop(
    log: Logger,
    ctx: AuthContext,
    writer: ConfigWriter,
    poll_interval: Duration,
    max_retry: u32,
    stop_signal: Receiver<()>,
) -> Result<(), DiscoveryError> {
    let interval = crossbeam_channel::tick(poll_interval);
    let mut budget = RetryBudget::new(max_retry);

    loop {
        crossbeam_channel::select! {
            recv(stop_signal) -> _ => {
                info!(log, "Received shutdown signal in discovery loop");
                return Ok(());
            },
            recv(interval) -> msg => {
                msg.expect("tick failed!");
            },
        };

        match run_cycle(&ctx, &writer).await {
            Ok(target_count) => {
                budget.reset();
                info!(log, "Published discovery document"; "targets" => target_count);
            }
            Err(CycleError::Fatal(err)) => {
                error!(
                    log,
                    "Authentication failed; check your RANCHER_ACCESS_KEY and RANCHER_SECRET_KEY";
                    "error" => %err
                );
                return Err(err);
            }
            Err(CycleError::Retryable(reason)) => {
                let exhausted = budget.record_failure();
                warn!(
                    log,
                    "Discovery cycle failed";
                    "reason" => reason,
                    "failures" => budget.failures,
                    "max_retry" => max_retry
                );
                if exhausted {
                    return Err(DiscoveryError::RetriesExhausted {
                        attempts: budget.failures,
                    });
                }
            }
        }
    }
}

async fn run_cycle(ctx: &AuthContext, writer: &ConfigWriter) -> Result<usize, CycleError> {
    let services = ctx.list_services().await.map_err(|err| match err {
        DiscoveryError::Auth { .. } => CycleError::Fatal(err),
        retryable => CycleError::Retryable(retryable.to_string()),
    })?;

    let groups = target_groups(&services);
    let target_count = groups.iter().map(|group| group.targets.len()).sum();

    // An I/O failure here may clear up by the next cycle (full disk, hiccup
    // on the mount), so it spends retry budget instead of terminating.
    writer
        .write(&groups)
        .map_err(|err| CycleError::Retryable(format!("writing discovery document: {}", err)))?;

    Ok(target_count)
}
