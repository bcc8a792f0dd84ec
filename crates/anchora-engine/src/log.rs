//! The backup audit log.
//!
//! Logs are append-mostly. Terminal transitions are `running -> success`,
//! `running -> error` (including orphan recovery), and `success -> deleted`
//! via retention; a terminal log never transitions back.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Reason recorded when retention prunes an artifact.
pub const RETENTION_REASON: &str = "Retention policy - exceeded retention count";

/// Reason recorded when startup recovery closes a stale running log.
pub const ORPHANED_REASON: &str = "orphaned";

/// Reason recorded when shutdown interrupts an execution.
pub const CANCELLED_REASON: &str = "cancelled";

/// Execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Running,
    Success,
    Error,
    Deleted,
}

/// Audit record of one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupLog {
    /// Unique log ID
    pub id: String,
    /// Owning schedule; `None` for ad-hoc runs
    pub schedule_id: Option<String>,
    /// Owning organization
    pub organization_id: String,
    /// User the execution acted as
    pub user_id: String,
    /// Connection display name, denormalized for display
    pub connection_name: String,
    /// Database that was backed up
    pub database_name: String,
    /// Execution status
    pub status: LogStatus,
    /// Start instant
    pub started_at: DateTime<Utc>,
    /// Completion instant, once terminal
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds, once terminal
    pub duration_ms: Option<u64>,
    /// Collections that archived cleanly
    pub collections_backed_up: Vec<String>,
    /// Size of the uploaded artifact
    pub file_size_bytes: u64,
    /// Object-store id of the artifact
    pub file_path: Option<String>,
    /// Browser-facing artifact link
    pub file_link: Option<String>,
    /// Error text, pre-sanitized of secrets
    pub error: Option<String>,
    /// When retention removed the artifact
    pub deleted_at: Option<DateTime<Utc>>,
    /// Why the artifact was removed
    pub deleted_reason: Option<String>,
}

/// Fields recorded when an execution commits success.
#[derive(Debug, Clone)]
pub struct SuccessRecord {
    pub collections_backed_up: Vec<String>,
    pub file_size_bytes: u64,
    pub file_path: String,
    pub file_link: Option<String>,
}

/// Read side the evaluator consults for overdue suppression.
#[async_trait]
pub trait ExecutionHistory: Send + Sync {
    /// Start instants of terminal (success or error) runs of a schedule
    /// started within `[from, to)`.
    async fn terminal_run_starts(
        &self,
        schedule_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<Vec<DateTime<Utc>>>;
}

/// Audit log store.
pub struct LogStore {
    logs: RwLock<HashMap<String, BackupLog>>,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore {
    /// Create an empty log store.
    pub fn new() -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a `running` log, conditionally: for scheduled runs the insert
    /// fails if the schedule already has a running log. This is the
    /// authoritative no-double-run guard.
    pub async fn begin_run(
        &self,
        schedule_id: Option<&str>,
        organization_id: &str,
        user_id: &str,
        connection_name: &str,
        database_name: &str,
    ) -> EngineResult<BackupLog> {
        let mut logs = self.logs.write().await;

        if let Some(schedule_id) = schedule_id {
            let in_flight = logs
                .values()
                .any(|l| l.schedule_id.as_deref() == Some(schedule_id) && l.status == LogStatus::Running);
            if in_flight {
                return Err(EngineError::AlreadyRunning(schedule_id.to_string()));
            }
        }

        let log = BackupLog {
            id: Uuid::new_v4().to_string(),
            schedule_id: schedule_id.map(str::to_string),
            organization_id: organization_id.to_string(),
            user_id: user_id.to_string(),
            connection_name: connection_name.to_string(),
            database_name: database_name.to_string(),
            status: LogStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            collections_backed_up: Vec::new(),
            file_size_bytes: 0,
            file_path: None,
            file_link: None,
            error: None,
            deleted_at: None,
            deleted_reason: None,
        };
        logs.insert(log.id.clone(), log.clone());
        Ok(log)
    }

    /// Append an already-terminal error log, for failures that abort before
    /// the running insert (permission, resolution, target discovery).
    pub async fn append_error(
        &self,
        schedule_id: Option<&str>,
        organization_id: &str,
        user_id: &str,
        connection_name: &str,
        database_name: &str,
        error: &str,
    ) -> BackupLog {
        let now = Utc::now();
        let log = BackupLog {
            id: Uuid::new_v4().to_string(),
            schedule_id: schedule_id.map(str::to_string),
            organization_id: organization_id.to_string(),
            user_id: user_id.to_string(),
            connection_name: connection_name.to_string(),
            database_name: database_name.to_string(),
            status: LogStatus::Error,
            started_at: now,
            completed_at: Some(now),
            duration_ms: Some(0),
            collections_backed_up: Vec::new(),
            file_size_bytes: 0,
            file_path: None,
            file_link: None,
            error: Some(error.to_string()),
            deleted_at: None,
            deleted_reason: None,
        };
        self.logs.write().await.insert(log.id.clone(), log.clone());
        log
    }

    /// Transition a running log to `success`.
    pub async fn finalize_success(
        &self,
        log_id: &str,
        record: SuccessRecord,
    ) -> EngineResult<BackupLog> {
        let mut logs = self.logs.write().await;
        let log = logs
            .get_mut(log_id)
            .ok_or_else(|| EngineError::NotFound("Backup log".to_string()))?;
        if log.status != LogStatus::Running {
            return Err(EngineError::InvalidState(format!(
                "log {} is not running",
                log_id
            )));
        }

        let now = Utc::now();
        log.status = LogStatus::Success;
        log.completed_at = Some(now);
        log.duration_ms = Some((now - log.started_at).num_milliseconds().max(0) as u64);
        log.collections_backed_up = record.collections_backed_up;
        log.file_size_bytes = record.file_size_bytes;
        log.file_path = Some(record.file_path);
        log.file_link = record.file_link;
        Ok(log.clone())
    }

    /// Transition a running log to `error`.
    pub async fn finalize_error(&self, log_id: &str, error: &str) -> EngineResult<BackupLog> {
        let mut logs = self.logs.write().await;
        let log = logs
            .get_mut(log_id)
            .ok_or_else(|| EngineError::NotFound("Backup log".to_string()))?;
        if log.status != LogStatus::Running {
            return Err(EngineError::InvalidState(format!(
                "log {} is not running",
                log_id
            )));
        }

        let now = Utc::now();
        log.status = LogStatus::Error;
        log.completed_at = Some(now);
        log.duration_ms = Some((now - log.started_at).num_milliseconds().max(0) as u64);
        log.error = Some(error.to_string());
        Ok(log.clone())
    }

    /// Transition a success log to `deleted` after its artifact was pruned.
    pub async fn mark_deleted(&self, log_id: &str, reason: &str) -> EngineResult<()> {
        let mut logs = self.logs.write().await;
        let log = logs
            .get_mut(log_id)
            .ok_or_else(|| EngineError::NotFound("Backup log".to_string()))?;
        if log.status != LogStatus::Success {
            return Err(EngineError::InvalidState(format!(
                "log {} is not a success",
                log_id
            )));
        }
        log.status = LogStatus::Deleted;
        log.deleted_at = Some(Utc::now());
        log.deleted_reason = Some(reason.to_string());
        Ok(())
    }

    /// Load a log.
    pub async fn get(&self, log_id: &str) -> Option<BackupLog> {
        self.logs.read().await.get(log_id).cloned()
    }

    /// Logs of a schedule, newest first.
    pub async fn list_for_schedule(&self, schedule_id: &str) -> Vec<BackupLog> {
        let logs = self.logs.read().await;
        let mut out: Vec<BackupLog> = logs
            .values()
            .filter(|l| l.schedule_id.as_deref() == Some(schedule_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out
    }

    /// Most recent log of a schedule.
    pub async fn latest_for_schedule(&self, schedule_id: &str) -> Option<BackupLog> {
        self.list_for_schedule(schedule_id).await.into_iter().next()
    }

    /// Success logs that still hold an artifact, newest first. This is the
    /// retention working set.
    pub async fn successes_with_artifacts(&self, schedule_id: &str) -> Vec<BackupLog> {
        self.list_for_schedule(schedule_id)
            .await
            .into_iter()
            .filter(|l| l.status == LogStatus::Success && l.file_path.is_some())
            .collect()
    }

    /// Logs of an organization, newest first.
    pub async fn list_for_organization(&self, organization_id: &str) -> Vec<BackupLog> {
        let logs = self.logs.read().await;
        let mut out: Vec<BackupLog> = logs
            .values()
            .filter(|l| l.organization_id == organization_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out
    }

    /// Close running logs older than the grace window as `error`/orphaned.
    /// Called once at engine start so the evaluator's history stays valid.
    pub async fn recover_orphans(&self, grace: chrono::Duration) -> Vec<String> {
        let cutoff = Utc::now() - grace;
        let mut logs = self.logs.write().await;
        let mut recovered = Vec::new();
        for log in logs.values_mut() {
            if log.status == LogStatus::Running && log.started_at < cutoff {
                let now = Utc::now();
                log.status = LogStatus::Error;
                log.completed_at = Some(now);
                log.duration_ms = Some((now - log.started_at).num_milliseconds().max(0) as u64);
                log.error = Some(ORPHANED_REASON.to_string());
                recovered.push(log.id.clone());
                warn!(log_id = %log.id, "recovered orphaned running log");
            }
        }
        if !recovered.is_empty() {
            info!(count = recovered.len(), "orphan recovery complete");
        }
        recovered
    }

    /// Drop every log owned by an organization.
    pub async fn purge_organization(&self, organization_id: &str) {
        self.logs
            .write()
            .await
            .retain(|_, l| l.organization_id != organization_id);
    }
}

#[cfg(test)]
impl LogStore {
    /// Test-only: overwrite a log wholesale, bypassing transition guards.
    pub(crate) async fn replace_for_tests(&self, log: BackupLog) {
        self.logs.write().await.insert(log.id.clone(), log);
    }
}

#[async_trait]
impl ExecutionHistory for LogStore {
    async fn terminal_run_starts(
        &self,
        schedule_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<Vec<DateTime<Utc>>> {
        let logs = self.logs.read().await;
        Ok(logs
            .values()
            .filter(|l| {
                l.schedule_id.as_deref() == Some(schedule_id)
                    && matches!(l.status, LogStatus::Success | LogStatus::Error)
                    && l.started_at >= from
                    && l.started_at < to
            })
            .map(|l| l.started_at)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success_record(path: &str) -> SuccessRecord {
        SuccessRecord {
            collections_backed_up: vec!["users".to_string()],
            file_size_bytes: 42,
            file_path: path.to_string(),
            file_link: None,
        }
    }

    #[tokio::test]
    async fn test_conditional_running_insert() {
        let store = LogStore::new();
        let first = store
            .begin_run(Some("s1"), "o1", "u1", "prod", "app")
            .await
            .unwrap();

        // Second running insert for the same schedule is refused.
        assert!(matches!(
            store.begin_run(Some("s1"), "o1", "u1", "prod", "app").await,
            Err(EngineError::AlreadyRunning(_))
        ));

        // A different schedule and ad-hoc runs are unaffected.
        assert!(store
            .begin_run(Some("s2"), "o1", "u1", "prod", "app")
            .await
            .is_ok());
        assert!(store.begin_run(None, "o1", "u1", "prod", "app").await.is_ok());

        // Once terminal, the schedule can run again.
        store.finalize_error(&first.id, "boom").await.unwrap();
        assert!(store
            .begin_run(Some("s1"), "o1", "u1", "prod", "app")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_terminal_logs_never_transition_back() {
        let store = LogStore::new();
        let log = store
            .begin_run(Some("s1"), "o1", "u1", "prod", "app")
            .await
            .unwrap();
        store
            .finalize_success(&log.id, success_record("file-1"))
            .await
            .unwrap();

        assert!(matches!(
            store.finalize_error(&log.id, "late").await,
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(
            store.finalize_success(&log.id, success_record("file-2")).await,
            Err(EngineError::InvalidState(_))
        ));

        // success -> deleted is the one allowed late transition.
        store.mark_deleted(&log.id, RETENTION_REASON).await.unwrap();
        let log = store.get(&log.id).await.unwrap();
        assert_eq!(log.status, LogStatus::Deleted);
        assert_eq!(log.deleted_reason.as_deref(), Some(RETENTION_REASON));

        // And deleted is terminal too.
        assert!(store.mark_deleted(&log.id, "again").await.is_err());
    }

    #[tokio::test]
    async fn test_orphan_recovery_closes_stale_running_logs() {
        let store = LogStore::new();
        let stale = store
            .begin_run(Some("s1"), "o1", "u1", "prod", "app")
            .await
            .unwrap();
        // Age the log past the grace window.
        {
            let mut logs = store.logs.write().await;
            logs.get_mut(&stale.id).unwrap().started_at =
                Utc::now() - chrono::Duration::hours(5);
        }
        let fresh = store
            .begin_run(Some("s2"), "o1", "u1", "prod", "app")
            .await
            .unwrap();

        let recovered = store.recover_orphans(chrono::Duration::hours(2)).await;
        assert_eq!(recovered, vec![stale.id.clone()]);

        let stale = store.get(&stale.id).await.unwrap();
        assert_eq!(stale.status, LogStatus::Error);
        assert_eq!(stale.error.as_deref(), Some(ORPHANED_REASON));

        // The fresh run is untouched.
        assert_eq!(store.get(&fresh.id).await.unwrap().status, LogStatus::Running);
    }

    #[tokio::test]
    async fn test_history_reports_terminal_runs_in_window() {
        let store = LogStore::new();
        let running = store
            .begin_run(Some("s1"), "o1", "u1", "prod", "app")
            .await
            .unwrap();
        let done = store
            .begin_run(None, "o1", "u1", "prod", "app")
            .await
            .unwrap();
        // Ad-hoc logs never appear in schedule history.
        store.finalize_error(&done.id, "x").await.unwrap();

        let from = Utc::now() - chrono::Duration::hours(1);
        let to = Utc::now() + chrono::Duration::hours(1);

        // A running log is not terminal.
        assert!(store
            .terminal_run_starts("s1", from, to)
            .await
            .unwrap()
            .is_empty());

        store
            .finalize_success(&running.id, success_record("file-1"))
            .await
            .unwrap();
        assert_eq!(store.terminal_run_starts("s1", from, to).await.unwrap().len(), 1);

        // Outside the window nothing is reported.
        let old = Utc::now() - chrono::Duration::hours(3);
        assert!(store
            .terminal_run_starts("s1", old, from)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_retention_working_set_excludes_deleted() {
        let store = LogStore::new();
        for i in 0..3 {
            let log = store
                .begin_run(Some("s1"), "o1", "u1", "prod", "app")
                .await
                .unwrap();
            store
                .finalize_success(&log.id, success_record(&format!("file-{}", i)))
                .await
                .unwrap();
        }

        let working = store.successes_with_artifacts("s1").await;
        assert_eq!(working.len(), 3);

        store
            .mark_deleted(&working[2].id, RETENTION_REASON)
            .await
            .unwrap();
        assert_eq!(store.successes_with_artifacts("s1").await.len(), 2);
    }
}
