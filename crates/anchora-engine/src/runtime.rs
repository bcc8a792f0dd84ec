//! The long-running scheduler loop.
//!
//! One logical task ticks the evaluator and dispatches due schedules onto a
//! bounded worker pool. The advisory per-schedule lock keeps a queued or
//! running schedule from being dispatched twice; the log store's conditional
//! running insert is the authoritative guard underneath it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::evaluator::ScheduleEvaluator;
use crate::executor::{BackupExecutor, ExecutionAuth, ExecutionRequest};
use crate::log::LogStore;
use crate::schedule::ScheduleStore;

/// The scheduler loop driver.
pub struct SchedulerLoop {
    executor: Arc<BackupExecutor>,
    schedules: Arc<ScheduleStore>,
    logs: Arc<LogStore>,
    config: EngineConfig,
    workers: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    shutdown: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

impl SchedulerLoop {
    /// Wire a loop over the executor and stores.
    pub fn new(
        executor: Arc<BackupExecutor>,
        schedules: Arc<ScheduleStore>,
        logs: Arc<LogStore>,
        config: EngineConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_pool_size));
        Self {
            executor,
            schedules,
            logs,
            config,
            workers,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Recover orphaned logs, then run the tick loop until shutdown.
    pub async fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let grace = chrono::Duration::milliseconds(
            self.config.orphaned_running_grace.as_millis() as i64
        );
        self.logs.recover_orphans(grace).await;

        let this = self.clone();
        tokio::spawn(async move {
            info!(tick = ?this.config.tick_interval, "scheduler loop started");
            let mut interval = tokio::time::interval(this.config.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    _ = interval.tick() => this.tick(Utc::now()).await,
                }
            }
            info!("scheduler loop stopped");
        })
    }

    /// One evaluation pass: compute the due set and dispatch each entry.
    /// Never raises; a failed dispatch is this tick's problem only.
    pub async fn tick(&self, now: DateTime<Utc>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let enabled = self.schedules.enabled_schedules().await;
        let due = ScheduleEvaluator::due_now(now, &enabled, &*self.logs).await;
        if !due.is_empty() {
            debug!(count = due.len(), "schedules due");
        }
        for schedule_id in due {
            self.dispatch(schedule_id).await;
        }
    }

    /// Fire-and-track one execution under the advisory per-schedule lock.
    async fn dispatch(&self, schedule_id: String) {
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(schedule_id.clone()) {
                debug!(schedule_id = %schedule_id, "skipping: execution in flight");
                return;
            }
        }

        let executor = self.executor.clone();
        let workers = self.workers.clone();
        let in_flight = self.in_flight.clone();
        let cancel = self.shutdown.child_token();

        self.tasks.lock().await.spawn(async move {
            match workers.acquire_owned().await {
                Ok(_permit) => {
                    let outcome = executor
                        .execute(
                            ExecutionRequest::Schedule {
                                schedule_id: schedule_id.clone(),
                                auth: ExecutionAuth::Scheduler,
                            },
                            cancel,
                        )
                        .await;
                    debug!(schedule_id = %schedule_id, success = outcome.success, "execution finished");
                }
                Err(_) => warn!(schedule_id = %schedule_id, "worker pool closed"),
            }
            in_flight.lock().await.remove(&schedule_id);
        });
    }

    /// Stop dispatching, cancel in-flight executions, and wait up to the
    /// shutdown grace before forcing termination.
    pub async fn shutdown(&self) {
        info!("scheduler loop shutting down");
        self.shutdown.cancel();

        let mut tasks = self.tasks.lock().await;
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("shutdown grace elapsed, aborting in-flight executions");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }

    #[cfg(test)]
    pub(crate) async fn wait_idle(&self) {
        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
    }
}
