//! Engine tuning knobs.

use std::time::Duration;

/// Engine configuration with production defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Scheduler loop tick period.
    pub tick_interval: Duration,
    /// Maximum concurrent backup executions.
    pub worker_pool_size: usize,
    /// Hard ceiling for one execution.
    pub max_execution_duration: Duration,
    /// Age past which a `running` log is considered orphaned at startup.
    pub orphaned_running_grace: Duration,
    /// Retention count applied when a schedule omits one.
    pub default_retention_count: u32,
    /// How long shutdown waits for in-flight executions.
    pub shutdown_grace: Duration,
    /// Documents fetched per page while streaming a collection.
    pub page_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let max_execution_duration = Duration::from_secs(60 * 60);
        Self {
            tick_interval: Duration::from_secs(60),
            worker_pool_size: 4,
            max_execution_duration,
            orphaned_running_grace: max_execution_duration * 2,
            default_retention_count: 7,
            shutdown_grace: Duration::from_secs(30),
            page_size: 1000,
        }
    }
}
