// SPDX-License-Identifier: MIT

use crate::app::config::Settings;
use crate::domain::constants::BATCH_COOLDOWN_SECS;
use crate::domain::error::EngineError;
use crate::infrastructure::data::db::Database;
use crate::infrastructure::data::schema::{ExecutionRecord, Plan};
use crate::services::pipeline::SwapPipeline;
use chrono::{NaiveDateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;

/// Generous upper bound on one pipeline run (several receipt waits plus
/// retries); an expired lease frees the plan for the next tick.
const PLAN_LEASE_SECONDS: i64 = 900;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval_seconds: u64,
    pub max_concurrent_executions: usize,
    pub retry_attempts: usize,
    pub retry_delay_ms: u64,
}

impl SchedulerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            interval_seconds: settings.scheduler_interval_seconds,
            max_concurrent_executions: settings.max_concurrent_executions,
            retry_attempts: settings.retry_attempts,
            retry_delay_ms: settings.retry_delay_ms,
        }
    }
}

#[derive(Default)]
pub struct SchedulerMetrics {
    total_executions: AtomicU64,
    successful_executions: AtomicU64,
    failed_executions: AtomicU64,
    cumulative_execution_ms: AtomicU64,
    active_plans_count: AtomicU64,
    last_execution_time: Mutex<Option<NaiveDateTime>>,
}

impl SchedulerMetrics {
    pub fn record(&self, success: bool, elapsed_ms: u64, at: NaiveDateTime) {
        self.total_executions.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_executions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_executions.fetch_add(1, Ordering::Relaxed);
        }
        self.cumulative_execution_ms
            .fetch_add(elapsed_ms, Ordering::Relaxed);
        *self.last_execution_time.lock().expect("metrics lock") = Some(at);
    }

    pub fn set_active_plans(&self, count: u64) {
        self.active_plans_count.store(count, Ordering::Relaxed);
    }

    pub fn average_execution_time_ms(&self) -> u64 {
        let total = self.total_executions.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        self.cumulative_execution_ms.load(Ordering::Relaxed) / total
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub last_execution_time: Option<NaiveDateTime>,
    pub average_execution_time_ms: u64,
    pub active_plans_count: u64,
    pub interval_seconds: u64,
    pub max_concurrent_executions: usize,
}

/// Periodic driver: selects due plans, fans them out in bounded batches,
/// isolates per-plan failures and keeps the tick loop alive.
pub struct Scheduler {
    db: Database,
    pipeline: Arc<SwapPipeline>,
    config: SchedulerConfig,
    metrics: SchedulerMetrics,
    shutdown: CancellationToken,
    is_running: AtomicBool,
}

impl Scheduler {
    pub fn new(db: Database, pipeline: Arc<SwapPipeline>, config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            db,
            pipeline,
            config,
            metrics: SchedulerMetrics::default(),
            shutdown: CancellationToken::new(),
            is_running: AtomicBool::new(false),
        })
    }

    /// Spawn the ticker. The first tick fires immediately, then every
    /// `interval_seconds`. A second call while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            tracing::warn!(target: "scheduler", "Scheduler already running");
            return;
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(
                target: "scheduler",
                interval_seconds = scheduler.config.interval_seconds,
                max_concurrent = scheduler.config.max_concurrent_executions,
                "Scheduler started"
            );
            let mut ticker = interval(Duration::from_secs(scheduler.config.interval_seconds));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = scheduler.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler.tick().await {
                            // Tick-level errors are logged, never fatal.
                            tracing::error!(target: "scheduler", error = %e, "Tick failed");
                        }
                    }
                }
            }
            scheduler.is_running.store(false, Ordering::SeqCst);
            tracing::info!(target: "scheduler", "Scheduler stopped");
        });
    }

    /// Stop the ticker. In-flight executions complete; no new ticks begin.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            is_running: self.is_running.load(Ordering::SeqCst),
            total_executions: self.metrics.total_executions.load(Ordering::Relaxed),
            successful_executions: self.metrics.successful_executions.load(Ordering::Relaxed),
            failed_executions: self.metrics.failed_executions.load(Ordering::Relaxed),
            last_execution_time: *self
                .metrics
                .last_execution_time
                .lock()
                .expect("metrics lock"),
            average_execution_time_ms: self.metrics.average_execution_time_ms(),
            active_plans_count: self.metrics.active_plans_count.load(Ordering::Relaxed),
            interval_seconds: self.config.interval_seconds,
            max_concurrent_executions: self.config.max_concurrent_executions,
        }
    }

    /// One synchronous tick, for `--once` invocations and tests.
    pub async fn tick_now(&self) -> Result<(), EngineError> {
        self.tick().await
    }

    async fn tick(&self) -> Result<(), EngineError> {
        let now = Utc::now().naive_utc();
        let due = self.db.due_plans(now).await?;

        if let Ok(active) = self.db.count_active_plans().await {
            self.metrics.set_active_plans(active);
        }

        if due.is_empty() {
            tracing::trace!(target: "scheduler", "No plans due");
            return Ok(());
        }
        tracing::info!(target: "scheduler", due = due.len(), "Executing due plans");

        let batches: Vec<&[Plan]> = due.chunks(self.config.max_concurrent_executions).collect();
        let batch_count = batches.len();
        for (index, batch) in batches.into_iter().enumerate() {
            join_all(batch.iter().map(|plan| self.run_plan(plan))).await;
            if index + 1 < batch_count {
                sleep(Duration::from_secs(BATCH_COOLDOWN_SECS)).await;
            }
        }
        Ok(())
    }

    /// Lease, re-read, execute with retry, record metrics. Every failure
    /// path stays inside this function: one plan can never break a batch.
    async fn run_plan(&self, plan: &Plan) {
        let now = Utc::now().naive_utc();
        match self.db.claim_plan(&plan.id, now, PLAN_LEASE_SECONDS).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    target: "scheduler",
                    plan_id = %plan.id,
                    "Skipping plan: no longer ACTIVE or leased elsewhere"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(target: "scheduler", plan_id = %plan.id, error = %e, "Lease claim failed");
                return;
            }
        }

        if let Ok(Some(last)) = self.db.latest_execution(&plan.id).await {
            tracing::debug!(
                target: "scheduler",
                plan_id = %plan.id,
                last_status = ?last.status,
                last_executed_at = %last.executed_at,
                "Previous execution context"
            );
        }

        // Fresh row: the amount or slippage may have changed since selection.
        let fresh = match self.db.plan(&plan.id).await {
            Ok(Some(p)) if p.is_active() => p,
            Ok(_) => {
                tracing::debug!(target: "scheduler", plan_id = %plan.id, "Plan vanished or paused after claim");
                return;
            }
            Err(e) => {
                tracing::warn!(target: "scheduler", plan_id = %plan.id, error = %e, "Plan re-read failed");
                let _ = self.db.release_lease(&plan.id).await;
                return;
            }
        };

        let started = Instant::now();
        let result = self.execute_with_retry(&fresh).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.metrics
            .record(result.is_ok(), elapsed_ms, Utc::now().naive_utc());

        match result {
            Ok(record) => {
                tracing::info!(
                    target: "scheduler",
                    plan_id = %fresh.id,
                    execution_id = %record.id,
                    elapsed_ms,
                    "Plan executed"
                );
            }
            Err(e) => {
                tracing::error!(
                    target: "scheduler",
                    plan_id = %fresh.id,
                    elapsed_ms,
                    error = %e,
                    "Plan execution failed; will retry at next interval"
                );
                let _ = self.db.release_lease(&fresh.id).await;
            }
        }
    }

    async fn execute_with_retry(&self, plan: &Plan) -> Result<ExecutionRecord, EngineError> {
        let mut attempt = 1;
        loop {
            match self.pipeline.execute_plan(plan).await {
                Ok(record) => return Ok(record),
                Err(e) if attempt < self.config.retry_attempts => {
                    tracing::warn!(
                        target: "scheduler",
                        plan_id = %plan.id,
                        attempt,
                        error = %e,
                        "Pipeline attempt failed; retrying"
                    );
                    sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_track_counts_and_average() {
        let metrics = SchedulerMetrics::default();
        assert_eq!(metrics.average_execution_time_ms(), 0);

        let now = Utc::now().naive_utc();
        metrics.record(true, 100, now);
        metrics.record(false, 300, now);

        assert_eq!(metrics.total_executions.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.successful_executions.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.failed_executions.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.average_execution_time_ms(), 200);
    }

    #[test]
    fn single_full_batch_has_no_cooldown_slot() {
        // chunks() yields one slice when len == max; cooldown only runs
        // between batches.
        let plans: Vec<u32> = (0..50).collect();
        let batches: Vec<&[u32]> = plans.chunks(50).collect();
        assert_eq!(batches.len(), 1);

        let plans: Vec<u32> = (0..51).collect();
        let batches: Vec<&[u32]> = plans.chunks(50).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].len(), 1);
    }
}
