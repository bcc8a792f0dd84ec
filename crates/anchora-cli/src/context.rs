//! The runtime context owning every service.
//!
//! Construction follows the platform's init order: Vault, IdentityStore,
//! TenancyStore, ConnectionRegistry, ScheduleStore, NotificationSink,
//! BackupExecutor, SchedulerLoop. Shutdown runs in reverse: the loop drains
//! first, stores follow.

use std::sync::Arc;

use anchora_auth::IdentityStore;
use anchora_drive::{DriveStore, ObjectStore, TokenStore};
use anchora_engine::{BackupExecutor, LogStore, ScheduleStore, SchedulerLoop};
use anchora_notify::{NotificationSink, TelegramSink};
use anchora_registry::{ConnectionRegistry, SourceConnector};
use anchora_tenant::{TenantError, TenantResult, TenancyStore};
use anchora_vault::CredentialVault;
use tracing::info;

use crate::settings::Settings;

/// Every long-lived service, wired once at startup.
pub struct AppContext {
    pub vault: Arc<CredentialVault>,
    pub identity: Arc<IdentityStore>,
    pub tenancy: Arc<TenancyStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub logs: Arc<LogStore>,
    pub schedules: Arc<ScheduleStore>,
    pub tokens: Arc<TokenStore>,
    pub drive: Arc<DriveStore>,
    pub executor: Arc<BackupExecutor>,
    pub scheduler: Arc<SchedulerLoop>,
}

impl AppContext {
    /// Wire the full service graph over a document-source connector.
    pub fn build(
        settings: &Settings,
        connector: Arc<dyn SourceConnector>,
    ) -> anyhow::Result<Self> {
        let engine_config = settings.engine_config();

        let vault = Arc::new(CredentialVault::new(settings.master_key.clone())?);
        let identity = Arc::new(IdentityStore::new(vault.clone(), settings.session_ttl()));
        let tenancy = Arc::new(TenancyStore::new(vault.clone()));
        let registry = Arc::new(ConnectionRegistry::new(
            vault.clone(),
            tenancy.clone(),
            connector,
            settings.mongo_pool_size,
        ));
        let logs = Arc::new(LogStore::new());
        let schedules = Arc::new(ScheduleStore::new(
            tenancy.clone(),
            logs.clone(),
            engine_config.default_retention_count,
        ));
        let tokens = Arc::new(TokenStore::new(vault.clone()));
        let drive = Arc::new(DriveStore::new(settings.drive_config(), tokens.clone()));
        let notifier: Arc<dyn NotificationSink> = Arc::new(TelegramSink::new());

        let executor = Arc::new(BackupExecutor::new(
            tenancy.clone(),
            registry.clone(),
            schedules.clone(),
            logs.clone(),
            drive.clone() as Arc<dyn ObjectStore>,
            notifier,
            engine_config.clone(),
        ));
        let scheduler = Arc::new(SchedulerLoop::new(
            executor.clone(),
            schedules.clone(),
            logs.clone(),
            engine_config,
        ));

        info!("service graph wired");
        Ok(Self {
            vault,
            identity,
            tenancy,
            registry,
            logs,
            schedules,
            tokens,
            drive,
            executor,
            scheduler,
        })
    }

    /// Delete an organization and cascade over everything it owns:
    /// memberships, invitations, grants, connections, schedules, and logs.
    pub async fn delete_organization(&self, admin_id: &str, org_id: &str) -> TenantResult<()> {
        // The tenancy store runs the admin predicate and drops its own rows.
        self.tenancy.delete_organization(admin_id, org_id).await?;

        let connections = self.registry.purge_organization(org_id).await;
        for connection_id in &connections {
            self.tenancy.purge_connection_grants(connection_id).await;
        }
        let schedules = self.schedules.purge_organization(org_id).await;
        self.logs.purge_organization(org_id).await;

        info!(
            org_id = %org_id,
            connections = connections.len(),
            schedules = schedules.len(),
            "organization cascade complete"
        );
        Ok(())
    }

    /// Accept an invitation on behalf of a logged-in user.
    ///
    /// Bridges the identity store (who the user is, whether their email is
    /// verified) into the tenancy store's redemption check.
    pub async fn accept_invitation(&self, user_id: &str, token: &str) -> TenantResult<()> {
        let user = self
            .identity
            .user(user_id)
            .await
            .ok_or_else(|| TenantError::NotFound("User".to_string()))?;
        self.tenancy
            .accept_invitation(user_id, &user.email, user.email_verified, token)
            .await
    }

    /// Start the scheduler loop (runs orphan recovery first).
    pub async fn start(&self) -> tokio::task::JoinHandle<()> {
        self.scheduler.start().await
    }

    /// Graceful shutdown: drain the loop within its grace window.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        info!("shutdown complete");
    }
}
