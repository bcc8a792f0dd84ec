//! One backup execution, end to end: gate, resolve, fetch, archive, upload,
//! log, prune, notify.
//!
//! The executor never raises: every failure is recorded on the audit log
//! and folded into the returned outcome.

use std::sync::Arc;
use std::time::Instant;

use anchora_drive::ObjectStore;
use anchora_notify::{ChannelConfig, NotificationSink};
use anchora_registry::{ConnectionRegistry, FindQuery};
use anchora_tenant::TenancyStore;
use bytes::Bytes;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::{artifact_file_name, artifact_folder, ArchiveBuilder};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::log::{BackupLog, LogStatus, LogStore, SuccessRecord, CANCELLED_REASON, RETENTION_REASON};
use crate::schedule::ScheduleStore;

/// Inline target for a user-triggered run without a schedule.
#[derive(Debug, Clone)]
pub struct AdHocBackup {
    pub organization_id: String,
    pub connection_id: String,
    pub database_name: String,
    /// Explicit collections; empty means all non-system collections.
    pub collections: Vec<String>,
}

/// Who authorized a scheduled execution.
#[derive(Debug, Clone)]
pub enum ExecutionAuth {
    /// User-triggered: the supplied backup password is verified.
    UserWithPassword {
        user_id: String,
        backup_password: String,
    },
    /// Loop-fired: the engine acts as the schedule's creator, whose admin
    /// role is re-asserted. The backup password was proven at schedule
    /// creation.
    Scheduler,
}

/// One execution request.
#[derive(Debug, Clone)]
pub enum ExecutionRequest {
    Schedule {
        schedule_id: String,
        auth: ExecutionAuth,
    },
    AdHoc {
        user_id: String,
        backup_password: String,
        backup: AdHocBackup,
    },
}

/// What the caller learns about an execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub log_id: Option<String>,
}

impl ExecutionOutcome {
    fn failed(log_id: Option<String>) -> Self {
        Self {
            success: false,
            log_id,
        }
    }
}

/// Resolved execution target, independent of how the request arrived.
struct RunTarget {
    schedule_id: Option<String>,
    organization_id: String,
    acting_user: String,
    connection_id: String,
    database_name: String,
    collections: Vec<String>,
    retention_count: Option<u32>,
}

/// The backup executor.
pub struct BackupExecutor {
    tenancy: Arc<TenancyStore>,
    registry: Arc<ConnectionRegistry>,
    schedules: Arc<ScheduleStore>,
    logs: Arc<LogStore>,
    object_store: Arc<dyn ObjectStore>,
    notifier: Arc<dyn NotificationSink>,
    config: EngineConfig,
}

impl BackupExecutor {
    /// Wire an executor over its collaborators.
    pub fn new(
        tenancy: Arc<TenancyStore>,
        registry: Arc<ConnectionRegistry>,
        schedules: Arc<ScheduleStore>,
        logs: Arc<LogStore>,
        object_store: Arc<dyn ObjectStore>,
        notifier: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            tenancy,
            registry,
            schedules,
            logs,
            object_store,
            notifier,
            config,
        }
    }

    /// Run one backup. Never raises; the outcome and the audit log carry
    /// every failure.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        let target = match self.prepare(request).await {
            Ok(target) => target,
            Err(err) => {
                warn!(error = %err, "execution rejected before start");
                return ExecutionOutcome::failed(None);
            }
        };
        self.run(target, cancel).await
    }

    /// Steps 1-2: load the target and run the permission gate.
    async fn prepare(&self, request: ExecutionRequest) -> EngineResult<RunTarget> {
        match request {
            ExecutionRequest::Schedule { schedule_id, auth } => {
                let schedule = self
                    .schedules
                    .get(&schedule_id)
                    .await
                    .ok_or_else(|| EngineError::NotFound("Schedule".to_string()))?;
                if !schedule.enabled {
                    return Err(EngineError::Validation("Schedule is disabled".to_string()));
                }

                let acting_user = match auth {
                    ExecutionAuth::UserWithPassword {
                        user_id,
                        backup_password,
                    } => {
                        if !self
                            .tenancy
                            .can_backup(&user_id, &schedule.organization_id, &backup_password)
                            .await
                        {
                            return Err(EngineError::PermissionDenied);
                        }
                        user_id
                    }
                    ExecutionAuth::Scheduler => {
                        if !self
                            .tenancy
                            .is_admin(&schedule.created_by, &schedule.organization_id)
                            .await
                        {
                            return Err(EngineError::PermissionDenied);
                        }
                        schedule.created_by.clone()
                    }
                };

                Ok(RunTarget {
                    schedule_id: Some(schedule.id),
                    organization_id: schedule.organization_id,
                    acting_user,
                    connection_id: schedule.connection_id,
                    database_name: schedule.database_name,
                    collections: schedule.collections,
                    retention_count: Some(schedule.retention_count),
                })
            }
            ExecutionRequest::AdHoc {
                user_id,
                backup_password,
                backup,
            } => {
                if !self
                    .tenancy
                    .can_backup(&user_id, &backup.organization_id, &backup_password)
                    .await
                {
                    return Err(EngineError::PermissionDenied);
                }
                Ok(RunTarget {
                    schedule_id: None,
                    organization_id: backup.organization_id,
                    acting_user: user_id,
                    connection_id: backup.connection_id,
                    database_name: backup.database_name,
                    collections: backup.collections,
                    retention_count: None,
                })
            }
        }
    }

    /// Steps 3-12.
    async fn run(&self, target: RunTarget, cancel: CancellationToken) -> ExecutionOutcome {
        let schedule_id = target.schedule_id.as_deref();

        // Step 3: resolve the connection into a live client.
        let resolved = match self
            .registry
            .resolve(&target.acting_user, &target.organization_id, &target.connection_id)
            .await
        {
            Ok(resolved) => resolved,
            Err(err) => {
                let name = self
                    .registry
                    .connection(&target.connection_id)
                    .await
                    .map(|c| c.display_name)
                    .unwrap_or_else(|| target.connection_id.clone());
                let log = self
                    .logs
                    .append_error(
                        schedule_id,
                        &target.organization_id,
                        &target.acting_user,
                        &name,
                        &target.database_name,
                        &err.to_string(),
                    )
                    .await;
                self.notify(&log).await;
                return ExecutionOutcome::failed(Some(log.id));
            }
        };
        let connection_name = resolved.connection.display_name.clone();
        let source = resolved.source;

        // Step 4: determine target collections, lexicographic.
        let mut collections = if target.collections.is_empty() {
            match source.list_collections(&target.database_name).await {
                Ok(names) => names
                    .into_iter()
                    .filter(|name| !name.starts_with("system."))
                    .collect(),
                Err(err) => {
                    let log = self
                        .logs
                        .append_error(
                            schedule_id,
                            &target.organization_id,
                            &target.acting_user,
                            &connection_name,
                            &target.database_name,
                            &err.to_string(),
                        )
                        .await;
                    self.notify(&log).await;
                    return ExecutionOutcome::failed(Some(log.id));
                }
            }
        } else {
            target.collections.clone()
        };
        collections.sort();
        collections.dedup();

        // Step 5: the durable running insert, before any side effects.
        let log = match self
            .logs
            .begin_run(
                schedule_id,
                &target.organization_id,
                &target.acting_user,
                &connection_name,
                &target.database_name,
            )
            .await
        {
            Ok(log) => log,
            Err(EngineError::AlreadyRunning(id)) => {
                debug!(schedule_id = %id, "skipping: execution already in flight");
                return ExecutionOutcome::failed(None);
            }
            Err(err) => {
                warn!(error = %err, "failed to open backup log");
                return ExecutionOutcome::failed(None);
            }
        };
        if let Some(schedule_id) = schedule_id {
            self.schedules.record_run(schedule_id, log.started_at).await;
        }

        info!(
            log_id = %log.id,
            database = %target.database_name,
            collections = collections.len(),
            "backup started"
        );

        // Steps 6-7: stream collections into the archive.
        let deadline = Instant::now() + self.config.max_execution_duration;
        let mut archive = ArchiveBuilder::new();
        let mut clean: Vec<String> = Vec::new();

        for collection in &collections {
            let read = self
                .read_collection(&*source, &target.database_name, collection, &cancel, deadline)
                .await;
            let step = match read {
                Ok(documents) => archive
                    .add_collection(collection, &documents)
                    .map(|()| clean.push(collection.clone())),
                Err(EngineError::Cancelled) => {
                    return self.fail_run(&log, CANCELLED_REASON).await;
                }
                Err(EngineError::DeadlineExceeded) => {
                    return self
                        .fail_run(&log, &EngineError::DeadlineExceeded.to_string())
                        .await;
                }
                Err(err) => {
                    // Per-collection failure: substitute the error entry and
                    // keep going.
                    warn!(collection = %collection, error = %err, "collection read failed");
                    archive.add_error(collection, &err.to_string())
                }
            };
            if let Err(err) = step {
                return self.fail_run(&log, &err.to_string()).await;
            }
        }

        let archive_bytes = match archive.finish() {
            Ok(bytes) => bytes,
            Err(err) => return self.fail_run(&log, &err.to_string()).await,
        };
        let file_size_bytes = archive_bytes.len() as u64;

        if cancel.is_cancelled() {
            return self.fail_run(&log, CANCELLED_REASON).await;
        }

        // Steps 8-9: upload the artifact.
        let folder = artifact_folder(&connection_name, &target.database_name);
        let file_name =
            artifact_file_name(&connection_name, &target.database_name, log.started_at);
        let uploaded = match self
            .object_store
            .upload_file(
                &target.acting_user,
                Bytes::from(archive_bytes),
                &file_name,
                "application/zip",
                &folder,
            )
            .await
        {
            Ok(uploaded) => uploaded,
            Err(err) => return self.fail_run(&log, &err.to_string()).await,
        };

        // Step 10: commit the outcome. Success needs at least one clean
        // collection.
        if clean.is_empty() {
            return self.fail_run(&log, "no collection archived cleanly").await;
        }
        let finalized = match self
            .logs
            .finalize_success(
                &log.id,
                SuccessRecord {
                    collections_backed_up: clean,
                    file_size_bytes,
                    file_path: uploaded.file_id,
                    file_link: uploaded.web_view_link,
                },
            )
            .await
        {
            Ok(finalized) => finalized,
            Err(err) => {
                warn!(log_id = %log.id, error = %err, "failed to finalize log");
                return ExecutionOutcome::failed(Some(log.id));
            }
        };

        // Step 11: retention, inside the owning execution.
        if let (Some(schedule_id), Some(retention)) = (schedule_id, target.retention_count) {
            self.enforce_retention(schedule_id, &target.acting_user, retention)
                .await;
        }

        // Step 12: best-effort notification.
        self.notify(&finalized).await;

        info!(log_id = %finalized.id, size = file_size_bytes, "backup succeeded");
        ExecutionOutcome {
            success: true,
            log_id: Some(finalized.id),
        }
    }

    /// Page one collection out of the source, honoring cancellation and the
    /// execution deadline at every page boundary.
    async fn read_collection(
        &self,
        source: &dyn anchora_registry::DocumentSource,
        database: &str,
        collection: &str,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> EngineResult<Vec<Value>> {
        let mut documents = Vec::new();
        let mut skip = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(EngineError::DeadlineExceeded);
            }

            let page = source
                .find_documents(
                    database,
                    collection,
                    &FindQuery::id_ordered_page(skip, self.config.page_size),
                )
                .await
                .map_err(anchora_registry::RegistryError::from)?;

            let fetched = page.len() as u64;
            documents.extend(page);
            if fetched < self.config.page_size {
                return Ok(documents);
            }
            skip += fetched;
        }
    }

    /// Finalize a running log as `error` and report the failure.
    async fn fail_run(&self, log: &BackupLog, reason: &str) -> ExecutionOutcome {
        match self.logs.finalize_error(&log.id, reason).await {
            Ok(finalized) => {
                warn!(log_id = %finalized.id, reason = %reason, "backup failed");
                self.notify(&finalized).await;
            }
            Err(err) => warn!(log_id = %log.id, error = %err, "failed to record failure"),
        }
        ExecutionOutcome::failed(Some(log.id.clone()))
    }

    /// Keep the newest `retention` success artifacts; prune the rest.
    /// Individual deletion failures never fail the execution.
    async fn enforce_retention(&self, schedule_id: &str, acting_user: &str, retention: u32) {
        let working_set = self.logs.successes_with_artifacts(schedule_id).await;
        for expired in working_set.iter().skip(retention as usize) {
            if let Some(file_path) = &expired.file_path {
                if let Err(err) = self.object_store.delete_file(acting_user, file_path).await {
                    warn!(log_id = %expired.id, error = %err, "artifact deletion failed");
                }
            }
            if let Err(err) = self.logs.mark_deleted(&expired.id, RETENTION_REASON).await {
                warn!(log_id = %expired.id, error = %err, "retention transition failed");
            } else {
                info!(log_id = %expired.id, "artifact pruned by retention");
            }
        }
    }

    /// Best-effort outcome notification through the organization's channel.
    async fn notify(&self, log: &BackupLog) {
        let Some(organization) = self.tenancy.organization(&log.organization_id).await else {
            return;
        };
        let Some(channel) = ChannelConfig::from_parts(
            organization.telegram_bot_token.clone(),
            organization.telegram_chat_id.clone(),
        ) else {
            return;
        };
        let text = format_outcome(log, &organization.name);
        self.notifier.notify(&channel, &text).await;
    }
}

/// Short human-readable outcome message.
fn format_outcome(log: &BackupLog, organization_name: &str) -> String {
    let status = match log.status {
        LogStatus::Success => "succeeded",
        LogStatus::Error => "failed",
        LogStatus::Running => "running",
        LogStatus::Deleted => "deleted",
    };
    let mut text = format!(
        "Backup {}: {} / {} / {}",
        status, organization_name, log.connection_name, log.database_name
    );
    if let Some(duration_ms) = log.duration_ms {
        text.push_str(&format!("\nDuration: {:.1}s", duration_ms as f64 / 1000.0));
    }
    if log.status == LogStatus::Success {
        text.push_str(&format!("\nSize: {} bytes", log.file_size_bytes));
        if let Some(link) = &log.file_link {
            text.push_str(&format!("\n{}", link));
        }
    }
    if let Some(error) = &log.error {
        text.push_str(&format!("\nError: {}", error));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{Destination, NewSchedule, WeeklySchedule};
    use anchora_drive::MemoryObjectStore;
    use anchora_notify::NullSink;
    use anchora_registry::memory::{MemoryConnector, MemorySource};
    use anchora_vault::CredentialVault;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::io::{Cursor, Read};
    use zip::ZipArchive;

    const URI: &str = "mongodb://db.local:27017";

    struct Fixture {
        executor: BackupExecutor,
        tenancy: Arc<TenancyStore>,
        registry: Arc<ConnectionRegistry>,
        schedules: Arc<ScheduleStore>,
        logs: Arc<LogStore>,
        object_store: Arc<MemoryObjectStore>,
        source: Arc<MemorySource>,
        org_id: String,
        connection_id: String,
    }

    async fn fixture() -> Fixture {
        let vault = Arc::new(CredentialVault::new("test-master-key").unwrap());
        let tenancy = Arc::new(TenancyStore::new(vault.clone()));
        let org_id = tenancy
            .create_organization("admin-1", "Acme", "backup-pw")
            .await
            .unwrap();

        let connector = Arc::new(MemoryConnector::new());
        let source = connector.register(URI).await;

        let registry = Arc::new(ConnectionRegistry::new(
            vault.clone(),
            tenancy.clone(),
            connector,
            10,
        ));
        let connection = registry
            .create_connection("admin-1", &org_id, "prod cluster", URI)
            .await
            .unwrap();

        let logs = Arc::new(LogStore::new());
        let schedules = Arc::new(ScheduleStore::new(tenancy.clone(), logs.clone(), 7));
        let object_store = Arc::new(MemoryObjectStore::new());

        let config = EngineConfig {
            page_size: 2,
            ..Default::default()
        };
        let executor = BackupExecutor::new(
            tenancy.clone(),
            registry.clone(),
            schedules.clone(),
            logs.clone(),
            object_store.clone(),
            Arc::new(NullSink::new()),
            config,
        );

        Fixture {
            executor,
            tenancy,
            registry,
            schedules,
            logs,
            object_store,
            source,
            org_id,
            connection_id: connection.id,
        }
    }

    fn every_day() -> WeeklySchedule {
        WeeklySchedule {
            days: (0..=6).collect::<BTreeSet<u8>>(),
            times: vec!["00:00".to_string()],
            timezone: "UTC".to_string(),
            catch_up_previous_day: false,
        }
    }

    async fn make_schedule(fx: &Fixture, collections: &[&str], retention: u32) -> String {
        fx.schedules
            .create(
                "admin-1",
                &fx.org_id,
                NewSchedule {
                    connection_id: fx.connection_id.clone(),
                    database_name: "app".to_string(),
                    collections: collections.iter().map(|c| c.to_string()).collect(),
                    destination: Destination::default(),
                    schedule: every_day(),
                    retention_count: Some(retention),
                    enabled: true,
                },
            )
            .await
            .unwrap()
            .id
    }

    fn scheduled(schedule_id: &str) -> ExecutionRequest {
        ExecutionRequest::Schedule {
            schedule_id: schedule_id.to_string(),
            auth: ExecutionAuth::Scheduler,
        }
    }

    fn archive_entry(bytes: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        content
    }

    #[tokio::test]
    async fn test_successful_run_archives_uploads_and_logs() {
        let fx = fixture().await;
        fx.source.insert_documents(
            "app",
            "users",
            vec![
                json!({"_id": "1", "name": "ada"}),
                json!({"_id": "2", "name": "grace"}),
                json!({"_id": "3", "name": "mary"}),
            ],
        );
        fx.source
            .insert_documents("app", "orders", vec![json!({"_id": "o1"})]);
        // System collections never land in the archive.
        fx.source
            .insert_documents("app", "system.views", vec![json!({"_id": "v"})]);

        let schedule_id = make_schedule(&fx, &[], 3).await;
        let outcome = fx
            .executor
            .execute(scheduled(&schedule_id), CancellationToken::new())
            .await;
        assert!(outcome.success);

        let log = fx.logs.get(&outcome.log_id.unwrap()).await.unwrap();
        assert_eq!(log.status, LogStatus::Success);
        assert_eq!(log.connection_name, "prod cluster");
        assert_eq!(
            log.collections_backed_up,
            vec!["orders".to_string(), "users".to_string()]
        );
        assert!(log.file_size_bytes > 0);
        assert!(log.completed_at.is_some());

        let stored = fx.object_store.object(log.file_path.as_ref().unwrap()).unwrap();
        assert_eq!(stored.folder_path, "backup/prod_cluster/app");
        assert!(stored.file_name.starts_with("backup_prod_cluster_app_"));
        assert!(stored.file_name.ends_with(".zip"));

        // Three pages of users (page size 2) arrive intact and ordered.
        let users: Vec<Value> =
            serde_json::from_str(&archive_entry(&stored.bytes, "users.json")).unwrap();
        assert_eq!(users.len(), 3);
        assert_eq!(users[0]["_id"], "1");
        assert_eq!(users[2]["_id"], "3");

        let mut zip = ZipArchive::new(Cursor::new(stored.bytes.to_vec())).unwrap();
        assert_eq!(zip.len(), 2);
        assert!(zip.by_name("system.views.json").is_err());

        // The schedule advanced its bookkeeping.
        let schedule = fx.schedules.get(&schedule_id).await.unwrap();
        assert!(schedule.last_run.is_some());
        assert!(schedule.next_run.is_some());
    }

    #[tokio::test]
    async fn test_partial_failure_still_succeeds_with_error_entry() {
        let fx = fixture().await;
        fx.source
            .insert_documents("app", "a", vec![json!({"_id": "1"})]);
        fx.source
            .insert_documents("app", "b", vec![json!({"_id": "2"})]);
        fx.source
            .insert_documents("app", "c", vec![json!({"_id": "3"})]);
        fx.source.fail_collection_after("app", "b", 0);

        let schedule_id = make_schedule(&fx, &["a", "b", "c"], 3).await;
        let outcome = fx
            .executor
            .execute(scheduled(&schedule_id), CancellationToken::new())
            .await;
        assert!(outcome.success);

        let log = fx.logs.get(&outcome.log_id.unwrap()).await.unwrap();
        assert_eq!(log.status, LogStatus::Success);
        assert_eq!(
            log.collections_backed_up,
            vec!["a".to_string(), "c".to_string()]
        );

        let stored = fx.object_store.object(log.file_path.as_ref().unwrap()).unwrap();
        let a: Vec<Value> = serde_json::from_str(&archive_entry(&stored.bytes, "a.json")).unwrap();
        assert_eq!(a.len(), 1);
        let b: Value = serde_json::from_str(&archive_entry(&stored.bytes, "b.json")).unwrap();
        assert!(b["error"].as_str().unwrap().contains("interrupted"));
        let c: Vec<Value> = serde_json::from_str(&archive_entry(&stored.bytes, "c.json")).unwrap();
        assert_eq!(c.len(), 1);
    }

    #[tokio::test]
    async fn test_all_collections_failing_is_an_error() {
        let fx = fixture().await;
        fx.source
            .insert_documents("app", "only", vec![json!({"_id": "1"})]);
        fx.source.fail_collection_after("app", "only", 0);

        let schedule_id = make_schedule(&fx, &["only"], 3).await;
        let outcome = fx
            .executor
            .execute(scheduled(&schedule_id), CancellationToken::new())
            .await;
        assert!(!outcome.success);

        let log = fx.logs.get(&outcome.log_id.unwrap()).await.unwrap();
        assert_eq!(log.status, LogStatus::Error);
        assert!(log.collections_backed_up.is_empty());
    }

    #[tokio::test]
    async fn test_retention_prunes_beyond_count() {
        let fx = fixture().await;
        fx.source
            .insert_documents("app", "users", vec![json!({"_id": "1"})]);
        let schedule_id = make_schedule(&fx, &["users"], 2).await;

        for _ in 0..3 {
            let outcome = fx
                .executor
                .execute(scheduled(&schedule_id), CancellationToken::new())
                .await;
            assert!(outcome.success);
        }

        // Exactly the retention count of artifacts survives.
        let working = fx.logs.successes_with_artifacts(&schedule_id).await;
        assert_eq!(working.len(), 2);
        assert_eq!(fx.object_store.len(), 2);

        let all = fx.logs.list_for_schedule(&schedule_id).await;
        assert_eq!(all.len(), 3);
        let deleted: Vec<_> = all
            .iter()
            .filter(|l| l.status == LogStatus::Deleted)
            .collect();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].deleted_reason.as_deref(), Some(RETENTION_REASON));
        // The oldest run is the pruned one.
        assert_eq!(deleted[0].id, all.last().unwrap().id);
    }

    #[tokio::test]
    async fn test_upload_failure_records_error() {
        let fx = fixture().await;
        fx.source
            .insert_documents("app", "users", vec![json!({"_id": "1"})]);
        fx.object_store.set_upload_failure(true);

        let schedule_id = make_schedule(&fx, &["users"], 3).await;
        let outcome = fx
            .executor
            .execute(scheduled(&schedule_id), CancellationToken::new())
            .await;
        assert!(!outcome.success);

        let log = fx.logs.get(&outcome.log_id.unwrap()).await.unwrap();
        assert_eq!(log.status, LogStatus::Error);
        assert!(log.error.as_deref().unwrap().contains("Upload failed"));
    }

    #[tokio::test]
    async fn test_disabled_schedule_is_rejected() {
        let fx = fixture().await;
        let schedule_id = make_schedule(&fx, &["users"], 3).await;
        fx.schedules
            .set_enabled("admin-1", &fx.org_id, &schedule_id, false)
            .await
            .unwrap();

        let outcome = fx
            .executor
            .execute(scheduled(&schedule_id), CancellationToken::new())
            .await;
        assert!(!outcome.success);
        assert!(outcome.log_id.is_none());
        assert!(fx.logs.list_for_schedule(&schedule_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_adhoc_requires_backup_password() {
        let fx = fixture().await;
        fx.source
            .insert_documents("app", "users", vec![json!({"_id": "1"})]);

        let backup = AdHocBackup {
            organization_id: fx.org_id.clone(),
            connection_id: fx.connection_id.clone(),
            database_name: "app".to_string(),
            collections: vec![],
        };

        // Wrong password: rejected before any work.
        let outcome = fx
            .executor
            .execute(
                ExecutionRequest::AdHoc {
                    user_id: "admin-1".to_string(),
                    backup_password: "wrong".to_string(),
                    backup: backup.clone(),
                },
                CancellationToken::new(),
            )
            .await;
        assert!(!outcome.success);
        assert!(fx.object_store.is_empty());

        // Correct password: runs, logs with no schedule id, no retention.
        let outcome = fx
            .executor
            .execute(
                ExecutionRequest::AdHoc {
                    user_id: "admin-1".to_string(),
                    backup_password: "backup-pw".to_string(),
                    backup,
                },
                CancellationToken::new(),
            )
            .await;
        assert!(outcome.success);
        let log = fx.logs.get(&outcome.log_id.unwrap()).await.unwrap();
        assert!(log.schedule_id.is_none());
        assert_eq!(fx.object_store.len(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_auth_requires_creator_still_admin() {
        let fx = fixture().await;
        fx.source
            .insert_documents("app", "users", vec![json!({"_id": "1"})]);
        let schedule_id = make_schedule(&fx, &["users"], 3).await;

        // Second admin joins, then the creator is demoted.
        let invitation = fx
            .tenancy
            .invite("admin-1", &fx.org_id, "bob@example.com")
            .await
            .unwrap();
        fx.tenancy
            .accept_invitation("bob-1", "bob@example.com", true, &invitation.token)
            .await
            .unwrap();
        fx.tenancy
            .set_role("admin-1", &fx.org_id, "bob-1", anchora_tenant::Role::Admin)
            .await
            .unwrap();
        fx.tenancy
            .set_role("bob-1", &fx.org_id, "admin-1", anchora_tenant::Role::Member)
            .await
            .unwrap();

        let outcome = fx
            .executor
            .execute(scheduled(&schedule_id), CancellationToken::new())
            .await;
        assert!(!outcome.success);
        assert!(fx.logs.list_for_schedule(&schedule_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_no_double_run_for_same_schedule() {
        let fx = fixture().await;
        fx.source
            .insert_documents("app", "users", vec![json!({"_id": "1"})]);
        let schedule_id = make_schedule(&fx, &["users"], 3).await;

        // Simulate an in-flight execution.
        let in_flight = fx
            .logs
            .begin_run(Some(&schedule_id), &fx.org_id, "admin-1", "prod cluster", "app")
            .await
            .unwrap();

        let outcome = fx
            .executor
            .execute(scheduled(&schedule_id), CancellationToken::new())
            .await;
        assert!(!outcome.success);

        // Only the in-flight log exists; nothing was uploaded.
        assert_eq!(fx.logs.list_for_schedule(&schedule_id).await.len(), 1);
        assert!(fx.object_store.is_empty());

        fx.logs.finalize_error(&in_flight.id, "x").await.unwrap();
        let outcome = fx
            .executor
            .execute(scheduled(&schedule_id), CancellationToken::new())
            .await;
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_cancellation_finalizes_log_as_cancelled() {
        let fx = fixture().await;
        fx.source
            .insert_documents("app", "users", vec![json!({"_id": "1"})]);
        let schedule_id = make_schedule(&fx, &["users"], 3).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = fx.executor.execute(scheduled(&schedule_id), cancel).await;
        assert!(!outcome.success);

        let log = fx.logs.get(&outcome.log_id.unwrap()).await.unwrap();
        assert_eq!(log.status, LogStatus::Error);
        assert_eq!(log.error.as_deref(), Some(CANCELLED_REASON));
        assert!(fx.object_store.is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_connection_appends_error_log() {
        let fx = fixture().await;
        // A connection whose deployment does not answer.
        let dead = fx
            .registry
            .create_connection("admin-1", &fx.org_id, "dead", "mongodb://nowhere:27017")
            .await
            .unwrap();
        let schedule_id = fx
            .schedules
            .create(
                "admin-1",
                &fx.org_id,
                NewSchedule {
                    connection_id: dead.id,
                    database_name: "app".to_string(),
                    collections: vec!["users".to_string()],
                    destination: Destination::default(),
                    schedule: every_day(),
                    retention_count: Some(3),
                    enabled: true,
                },
            )
            .await
            .unwrap()
            .id;

        let outcome = fx
            .executor
            .execute(scheduled(&schedule_id), CancellationToken::new())
            .await;
        assert!(!outcome.success);

        let log = fx.logs.get(&outcome.log_id.unwrap()).await.unwrap();
        assert_eq!(log.status, LogStatus::Error);
        assert_eq!(log.connection_name, "dead");
        assert!(log.error.is_some());
    }

    #[test]
    fn test_outcome_message_formatting() {
        let mut log = BackupLog {
            id: "l1".to_string(),
            schedule_id: Some("s1".to_string()),
            organization_id: "o1".to_string(),
            user_id: "u1".to_string(),
            connection_name: "prod".to_string(),
            database_name: "app".to_string(),
            status: LogStatus::Success,
            started_at: chrono::Utc::now(),
            completed_at: Some(chrono::Utc::now()),
            duration_ms: Some(2500),
            collections_backed_up: vec!["users".to_string()],
            file_size_bytes: 1024,
            file_path: Some("file-1".to_string()),
            file_link: Some("https://drive/file-1".to_string()),
            error: None,
            deleted_at: None,
            deleted_reason: None,
        };

        let text = format_outcome(&log, "Acme");
        assert!(text.contains("succeeded"));
        assert!(text.contains("Acme / prod / app"));
        assert!(text.contains("2.5s"));
        assert!(text.contains("1024 bytes"));
        assert!(text.contains("https://drive/file-1"));

        log.status = LogStatus::Error;
        log.error = Some("boom".to_string());
        let text = format_outcome(&log, "Acme");
        assert!(text.contains("failed"));
        assert!(text.contains("boom"));
        assert!(!text.contains("1024 bytes"));
    }
}
