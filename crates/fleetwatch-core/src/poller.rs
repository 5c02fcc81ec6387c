use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::DatasetKind;
use crate::orchestrator::Orchestrator;
use crate::scrape::RefreshOutcome;

/// Events emitted by the poller for monitoring/logging.
#[derive(Debug, Clone)]
pub enum PollerEvent<'a> {
    Started {
        interval: Duration,
    },
    CycleStarted {
        cycle: u64,
    },
    SessionUnavailable {
        error: &'a AppError,
    },
    DatasetRefreshed {
        outcome: &'a RefreshOutcome,
    },
    DatasetFailed {
        kind: DatasetKind,
        error: &'a AppError,
    },
    CycleCompleted {
        cycle: u64,
        refreshed: usize,
        failed: usize,
    },
    Stopped {
        cycles: u64,
    },
}

/// Trait for receiving poller events (decoupled logging).
pub trait PollerReporter: Send + Sync {
    fn report(&self, event: PollerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPollerReporter;

impl PollerReporter for TracingPollerReporter {
    fn report(&self, event: PollerEvent<'_>) {
        match event {
            PollerEvent::Started { interval } => {
                tracing::info!(interval_secs = interval.as_secs(), "Poller started");
            }
            PollerEvent::CycleStarted { cycle } => {
                tracing::debug!(cycle, "Poll cycle started");
            }
            PollerEvent::SessionUnavailable { error } if error.is_halt() => {
                tracing::debug!(%error, "Login halted, skipping cycle");
            }
            PollerEvent::SessionUnavailable { error } => {
                tracing::warn!(%error, "No session, skipping cycle");
            }
            PollerEvent::DatasetRefreshed { outcome } => {
                tracing::debug!(
                    kind = %outcome.kind,
                    records = outcome.records,
                    changed = outcome.changed,
                    "Dataset refreshed"
                );
            }
            PollerEvent::DatasetFailed { kind, error } => {
                tracing::debug!(%kind, %error, "Dataset refresh failed");
            }
            PollerEvent::CycleCompleted {
                cycle,
                refreshed,
                failed,
            } => {
                tracing::info!(cycle, refreshed, failed, "Poll cycle completed");
            }
            PollerEvent::Stopped { cycles } => {
                tracing::info!(cycles, "Poller stopped");
            }
        }
    }
}

/// Background loop running one cycle, then sleeping a fixed delay.
pub struct Poller {
    orchestrator: Orchestrator,
    interval: Duration,
}

impl Poller {
    pub fn new(orchestrator: Orchestrator, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Run the poll loop until cancellation.
    ///
    /// A cycle in progress is never interrupted; cancellation is observed
    /// between cycles and during the sleep.
    pub async fn run<PR: PollerReporter>(&self, cancel_token: CancellationToken, reporter: &PR) {
        reporter.report(PollerEvent::Started {
            interval: self.interval,
        });

        let mut cycles = 0u64;
        while !cancel_token.is_cancelled() {
            cycles += 1;
            reporter.report(PollerEvent::CycleStarted { cycle: cycles });

            let report = self.orchestrator.run_cycle().await;
            if let Some(error) = &report.session_error {
                reporter.report(PollerEvent::SessionUnavailable { error });
            }
            for (kind, result) in &report.outcomes {
                match result {
                    Ok(outcome) => reporter.report(PollerEvent::DatasetRefreshed { outcome }),
                    Err(error) => reporter.report(PollerEvent::DatasetFailed {
                        kind: *kind,
                        error,
                    }),
                }
            }
            reporter.report(PollerEvent::CycleCompleted {
                cycle: cycles,
                refreshed: report.refreshed(),
                failed: report.failed(),
            });

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                () = cancel_token.cancelled() => break,
            }
        }

        reporter.report(PollerEvent::Stopped { cycles });
    }

    /// Spawn the loop on the tokio runtime.
    pub fn spawn<PR: PollerReporter + 'static>(self, reporter: PR) -> PollerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            self.run(token, &reporter).await;
        });
        PollerHandle { cancel, join }
    }
}

/// Owner of a running poller.
pub struct PollerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl PollerHandle {
    /// Token that stops the poller when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signals the loop to stop and waits for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Poller task failed");
        }
    }
}
