//! # Loyalty Accrual Worker
//!
//! Drains `points_accrual_queue`, the outbox that order transactions write
//! into.
//!
//! ## Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    AccrualProcessor::run                                │
//! │                                                                         │
//! │   tokio::select! {                                                      │
//! │       interval.tick()   ──┐                                             │
//! │       kick_rx.recv()    ──┼──► process_pending()                        │
//! │                           │      pending(batch, max_attempts)           │
//! │                           │      apply(job) ── Err ──► mark_failed      │
//! │       shutdown_rx.recv() ─┴──► break                                    │
//! │   }                                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Commands kick the worker after committing an order so points show up
//! without waiting for the next tick. A failed job never affects the order;
//! it is retried until `max_attempts`, then left for an operator.

use std::time::Duration;

use katom_db::{Database, DbResult};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::LoyaltySettings;

/// Outcome of one pass over the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccrualPass {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Applies queued ACCRUE and REVERSE jobs to the points ledger.
pub struct AccrualProcessor {
    db: Database,
    settings: LoyaltySettings,
    kick_rx: mpsc::Receiver<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for nudging and stopping the processor.
#[derive(Debug, Clone)]
pub struct AccrualHandle {
    kick_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl AccrualHandle {
    /// Asks for a pass now. A kick already waiting covers this one.
    pub fn kick(&self) {
        let _ = self.kick_tx.try_send(());
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl AccrualProcessor {
    /// Creates a processor and returns its handle.
    pub fn new(db: Database, settings: LoyaltySettings) -> (Self, AccrualHandle) {
        let (kick_tx, kick_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let processor = AccrualProcessor {
            db,
            settings,
            kick_rx,
            shutdown_rx,
        };

        (processor, AccrualHandle { kick_tx, shutdown_tx })
    }

    /// Runs until shutdown. Spawn this as a background task.
    pub async fn run(mut self) {
        info!("Accrual worker starting");

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.settings.poll_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.drain().await,
                Some(()) = self.kick_rx.recv() => self.drain().await,
                _ = self.shutdown_rx.recv() => {
                    info!("Accrual worker shutting down");
                    break;
                }
            }
        }

        info!("Accrual worker stopped");
    }

    async fn drain(&self) {
        if let Err(e) = self.process_pending().await {
            error!(error = %e, "Failed to read accrual queue");
        }
    }

    /// Applies one batch of pending jobs.
    ///
    /// Job failures are recorded on the job and counted, not returned.
    /// Only a failure to read the queue is an error.
    pub async fn process_pending(&self) -> DbResult<AccrualPass> {
        let accrual = self.db.accrual();
        let jobs = accrual
            .pending(self.settings.batch_size, self.settings.max_attempts)
            .await?;

        let mut pass = AccrualPass::default();
        if jobs.is_empty() {
            return Ok(pass);
        }
        debug!(count = jobs.len(), "Processing accrual jobs");

        for job in &jobs {
            match accrual.apply(job).await {
                Ok(true) => pass.applied += 1,
                Ok(false) => pass.skipped += 1,
                Err(e) => {
                    pass.failed += 1;
                    error!(
                        job_id = %job.id,
                        order_id = %job.order_id,
                        attempts = job.attempts + 1,
                        error = %e,
                        "Accrual job failed"
                    );
                    if let Err(mark_err) = accrual.mark_failed(&job.id, &e.to_string()).await {
                        error!(job_id = %job.id, error = %mark_err, "Failed to record accrual failure");
                    }
                }
            }
        }

        if pass.failed > 0 {
            let dead = accrual.dead_letter_count(self.settings.max_attempts).await?;
            if dead > 0 {
                warn!(dead, "Accrual jobs exceeded max attempts and will not be retried");
            }
        }

        info!(
            applied = pass.applied,
            skipped = pass.skipped,
            failed = pass.failed,
            "Accrual pass complete"
        );
        Ok(pass)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::order::{cancel_order, create_order};
    use crate::testing::{fixture, order_request};

    #[tokio::test]
    async fn test_process_pending_accrues_member_order() {
        let fx = fixture().await;
        fx.open_shift(0).await;
        fx.stock_up(0, 10).await;

        let receipt = create_order(&fx.app, &fx.session(), order_request(&fx, &[(0, 3)], 30_000, true))
            .await
            .unwrap();

        let pass = fx.processor().process_pending().await.unwrap();
        assert_eq!(pass, AccrualPass { applied: 1, skipped: 0, failed: 0 });

        let balance = fx.points_for(0).await;
        assert_eq!(balance, 3);

        let jobs = fx.app.db().accrual().for_order(&receipt.order.id).await.unwrap();
        assert!(jobs.iter().all(|j| j.processed_at.is_some()));

        let again = fx.processor().process_pending().await.unwrap();
        assert_eq!(again, AccrualPass::default());
    }

    #[tokio::test]
    async fn test_cancel_after_accrual_reverses_points() {
        let fx = fixture().await;
        fx.open_shift(0).await;
        fx.stock_up(0, 10).await;

        let receipt = create_order(&fx.app, &fx.session(), order_request(&fx, &[(0, 2)], 20_000, true))
            .await
            .unwrap();
        fx.processor().process_pending().await.unwrap();
        assert_eq!(fx.points_for(0).await, 2);

        cancel_order(&fx.app, &fx.session(), &receipt.order.id, Some("wrong table".into()))
            .await
            .unwrap();
        fx.processor().process_pending().await.unwrap();

        assert_eq!(fx.points_for(0).await, 0);
    }

    #[tokio::test]
    async fn test_kick_is_coalesced() {
        let fx = fixture().await;
        let (mut processor, handle) =
            AccrualProcessor::new(fx.app.db().clone(), LoyaltySettings::default());

        handle.kick();
        handle.kick();
        handle.kick();

        assert!(processor.kick_rx.try_recv().is_ok());
        assert!(processor.kick_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let fx = fixture().await;
        let (processor, handle) = AccrualProcessor::new(fx.app.db().clone(), LoyaltySettings::default());

        let task = tokio::spawn(processor.run());
        handle.kick();
        handle.shutdown().await;

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
