//! Decides when sync cycles and outbox flushes run.

use crate::error::{Result, SyncError};
use crate::remote::Remote;
use crate::sync::{Feedback, SyncOptions, SyncReport, SyncService};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

const TRIGGER_CAPACITY: usize = 16;

/// Why a sync was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    /// Network came back
    Online,
    /// The app became visible again
    Visible,
    /// Background pull timer
    Interval,
    Manual,
    PullToRefresh,
}

impl Trigger {
    pub fn feedback(self) -> Feedback {
        match self {
            Trigger::Manual | Trigger::PullToRefresh => Feedback::Visible,
            Trigger::Startup | Trigger::Online | Trigger::Visible | Trigger::Interval => {
                Feedback::Silent
            }
        }
    }

    pub fn refreshes_catalog(self) -> bool {
        matches!(self, Trigger::Startup | Trigger::Manual)
    }
}

/// Sends triggers to a running [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Trigger>,
}

impl SchedulerHandle {
    /// Returns `false` once the scheduler has stopped.
    pub async fn trigger(&self, trigger: Trigger) -> bool {
        self.tx.send(trigger).await.is_ok()
    }

    /// Like [`trigger`](Self::trigger) but drops the request when the
    /// queue is full.
    pub fn try_trigger(&self, trigger: Trigger) -> bool {
        self.tx.try_send(trigger).is_ok()
    }
}

pub struct Scheduler<R> {
    service: SyncService<R>,
    triggers: mpsc::Receiver<Trigger>,
    pull_interval: Duration,
    flush_interval: Duration,
    suspended: bool,
}

impl<R: Remote> Scheduler<R> {
    pub fn new(
        service: SyncService<R>,
        pull_interval: Duration,
        flush_interval: Duration,
    ) -> (Self, SchedulerHandle) {
        let (tx, triggers) = mpsc::channel(TRIGGER_CAPACITY);
        let scheduler = Self {
            service,
            triggers,
            pull_interval,
            flush_interval,
            suspended: false,
        };
        (scheduler, SchedulerHandle { tx })
    }

    /// Silent triggers are ignored after the remote refused the token, until
    /// a visible sync succeeds.
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Act on one trigger. `None` when it was skipped.
    pub async fn handle(&mut self, trigger: Trigger) -> Option<Result<SyncReport>> {
        let feedback = trigger.feedback();
        if self.suspended && feedback == Feedback::Silent {
            tracing::debug!(?trigger, "Sync suspended until the token is fixed");
            return None;
        }
        tracing::debug!(?trigger, "Sync triggered");

        if trigger.refreshes_catalog() {
            match self.service.refresh_catalog().await {
                Ok(_) => {}
                Err(SyncError::Unauthorized) => {
                    tracing::error!(?trigger, "Catalog refresh failed: remote refused the token");
                    self.suspended = true;
                    return Some(Err(SyncError::Unauthorized));
                }
                Err(err) => tracing::warn!(error = %err, "Catalog refresh failed"),
            }
        }

        let outcome = self
            .service
            .sync(SyncOptions {
                feedback,
                force_full: false,
            })
            .await;
        match &outcome {
            Err(SyncError::Unauthorized) => self.suspended = true,
            Ok(_) if feedback == Feedback::Visible => self.suspended = false,
            _ => {}
        }
        Some(outcome)
    }

    async fn flush_tick(&mut self) {
        if self.suspended || self.service.pending_count() == 0 {
            return;
        }
        match self.service.flush().await {
            Ok(report) => {
                tracing::debug!(delivered = report.delivered, requeued = report.requeued, "Flushed outbox")
            }
            Err(SyncError::Unauthorized) => self.suspended = true,
            Err(err) => tracing::warn!(error = %err, "Flush failed"),
        }
    }

    /// Serve triggers and timers until `shutdown` resolves or every handle
    /// is dropped.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let start = Instant::now();
        let mut pull = interval_at(start + self.pull_interval, self.pull_interval);
        pull.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flush = interval_at(start + self.flush_interval, self.flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Scheduler shutting down");
                    break;
                }
                trigger = self.triggers.recv() => match trigger {
                    Some(trigger) => {
                        self.handle(trigger).await;
                    }
                    None => break,
                },
                _ = pull.tick() => {
                    self.handle(Trigger::Interval).await;
                }
                _ = flush.tick() => self.flush_tick().await,
            }
        }
    }
}
