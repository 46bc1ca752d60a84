//! Background recovery for orphaned sagas.
//!
//! Messages can be lost and processes can crash mid-saga. The recovery
//! engine periodically finds sagas whose deadline passed while still active
//! and re-drives them from their durable state, plus runs health monitoring
//! and retention cleanup.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::SagaId;
use saga_store::{SagaRecord, SagaStore};
use tokio::task::JoinHandle;

use crate::config::SagaConfig;
use crate::error::Result;
use crate::lifecycle::RECOVERY_EXHAUSTED_MESSAGE;
use crate::metrics::SagaMetrics;
use crate::orchestrator::SagaOrchestrator;
use crate::publisher::MessagePublisher;
use crate::schedule;

const CLEANUP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Outcome of one orphan sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Timed-out sagas examined.
    pub examined: usize,
    /// Sagas successfully re-driven.
    pub recovered: usize,
    /// Sagas failed because their retry budget was exhausted.
    pub exhausted: usize,
    /// Sagas the sweep could not process.
    pub errors: usize,
}

/// Periodically recovers stalled sagas and keeps the store healthy.
pub struct RecoveryEngine<S, P> {
    orchestrator: Arc<SagaOrchestrator<S, P>>,
    config: SagaConfig,
    enabled: AtomicBool,
}

impl<S, P> RecoveryEngine<S, P>
where
    S: SagaStore + 'static,
    P: MessagePublisher + 'static,
{
    /// Creates a recovery engine. Whether it starts enabled comes from the
    /// configuration.
    pub fn new(orchestrator: Arc<SagaOrchestrator<S, P>>, config: SagaConfig) -> Self {
        let enabled = AtomicBool::new(config.recovery_enabled);
        Self {
            orchestrator,
            config,
            enabled,
        }
    }

    /// Returns true if periodic recovery is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enables or disables periodic recovery at runtime. Does not affect
    /// [`force_recover`](Self::force_recover).
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        tracing::info!(enabled, "saga recovery toggled");
    }

    /// Finds sagas past their deadline and re-drives each one.
    ///
    /// A saga with retry budget left gets its current step's command
    /// re-emitted; one that can no longer be retried (budget spent, or a
    /// status recovery does not cover) is failed with
    /// [`RECOVERY_EXHAUSTED_MESSAGE`]. Errors on individual sagas are logged
    /// and counted, never abort the sweep.
    pub async fn recover_orphaned_sagas(&self) -> Result<SweepReport> {
        if !self.is_enabled() {
            tracing::debug!("recovery disabled, skipping sweep");
            return Ok(SweepReport::default());
        }

        let timed_out = self.orchestrator.lifecycle().find_timed_out_sagas().await?;
        let mut report = SweepReport {
            examined: timed_out.len(),
            ..Default::default()
        };

        for record in timed_out {
            self.metrics().record_timed_out();
            tracing::warn!(
                saga_id = %record.saga_id,
                order_id = %record.order_id,
                step = %record.current_step,
                retry_count = record.retry_count,
                "orphaned saga detected"
            );

            if !record.can_retry() {
                let saga_id = record.saga_id;
                match self
                    .orchestrator
                    .lifecycle()
                    .fail(record, RECOVERY_EXHAUSTED_MESSAGE)
                    .await
                {
                    Ok(_) => {
                        report.exhausted += 1;
                        self.metrics().record_failed();
                    }
                    Err(e) if e.is_concurrency_conflict() => {
                        tracing::debug!(saga_id = %saga_id, "saga progressed during sweep");
                    }
                    Err(e) => {
                        report.errors += 1;
                        tracing::error!(
                            saga_id = %saga_id,
                            error = %e,
                            "failed to fail exhausted saga"
                        );
                    }
                }
                continue;
            }

            match self.orchestrator.retry_saga(record.order_id).await {
                Ok(true) => {
                    report.recovered += 1;
                    self.metrics().record_recovered();
                }
                Ok(false) => report.exhausted += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(
                        saga_id = %record.saga_id,
                        error = %e,
                        "failed to recover saga"
                    );
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                recovered = report.recovered,
                exhausted = report.exhausted,
                errors = report.errors,
                "orphan sweep finished"
            );
        }
        Ok(report)
    }

    /// Reports sagas needing operator attention and refreshes status gauges.
    ///
    /// Read-only: monitoring never mutates saga state.
    pub async fn monitor_health(&self) -> Result<Vec<SagaRecord>> {
        let lifecycle = self.orchestrator.lifecycle();

        let attention = lifecycle.find_sagas_requiring_attention().await?;
        for record in &attention {
            let level_warn = record.retry_count >= self.config.alert_retry_threshold;
            if level_warn {
                tracing::warn!(
                    saga_id = %record.saga_id,
                    order_id = %record.order_id,
                    status = %record.status,
                    retry_count = record.retry_count,
                    last_error = record.last_error_message.as_deref().unwrap_or("none"),
                    "saga requires attention"
                );
            } else {
                tracing::info!(
                    saga_id = %record.saga_id,
                    status = %record.status,
                    "saga requires attention"
                );
            }
        }

        let stats = lifecycle.statistics().await?;
        SagaMetrics::emit_status_gauges(&stats);
        tracing::debug!(
            active = stats.active(),
            attention = attention.len(),
            "saga health check finished"
        );
        Ok(attention)
    }

    /// Deletes terminal sagas past the retention window.
    pub async fn cleanup_old_sagas(&self) -> Result<u64> {
        let deleted = self
            .orchestrator
            .lifecycle()
            .cleanup_old_sagas(self.config.cleanup_retention_days)
            .await?;
        self.metrics().record_cleaned_up(deleted);
        Ok(deleted)
    }

    /// Re-drives one saga immediately, even while periodic recovery is
    /// disabled. Returns false for terminal or unrecoverable sagas.
    pub async fn force_recover(&self, saga_id: SagaId) -> Result<bool> {
        let record = self.orchestrator.lifecycle().get_saga(saga_id).await?;
        if record.status.is_terminal() {
            tracing::info!(saga_id = %saga_id, status = %record.status, "saga is terminal, nothing to recover");
            return Ok(false);
        }

        tracing::info!(saga_id = %saga_id, order_id = %record.order_id, "forcing saga recovery");
        self.orchestrator.retry_saga(record.order_id).await
    }

    /// Spawns the periodic sweep, health, and cleanup loops.
    ///
    /// The returned handle aborts all loops when dropped.
    pub fn start(self: &Arc<Self>) -> RecoveryHandle {
        let sweep = {
            let engine = Arc::clone(self);
            schedule::spawn_interval(
                "orphan_sweep",
                Duration::from_secs(self.config.recovery_sweep_secs),
                move || {
                    let engine = Arc::clone(&engine);
                    async move {
                        if let Err(e) = engine.recover_orphaned_sagas().await {
                            tracing::error!(error = %e, "orphan sweep failed");
                        }
                    }
                },
            )
        };

        let health = {
            let engine = Arc::clone(self);
            schedule::spawn_interval(
                "saga_health",
                Duration::from_secs(self.config.health_check_secs),
                move || {
                    let engine = Arc::clone(&engine);
                    async move {
                        if let Err(e) = engine.monitor_health().await {
                            tracing::error!(error = %e, "saga health check failed");
                        }
                    }
                },
            )
        };

        let cleanup = {
            let engine = Arc::clone(self);
            schedule::spawn_interval(
                "saga_cleanup",
                Duration::from_secs(CLEANUP_INTERVAL_SECS),
                move || {
                    let engine = Arc::clone(&engine);
                    async move {
                        if let Err(e) = engine.cleanup_old_sagas().await {
                            tracing::error!(error = %e, "saga cleanup failed");
                        }
                    }
                },
            )
        };

        RecoveryHandle {
            tasks: vec![sweep, health, cleanup],
        }
    }

    fn metrics(&self) -> &Arc<SagaMetrics> {
        self.orchestrator.metrics()
    }
}

/// Owns the background recovery tasks; aborts them when dropped.
pub struct RecoveryHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl RecoveryHandle {
    /// Stops all background loops.
    pub fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for RecoveryHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
