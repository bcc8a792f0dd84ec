//! Backup schedules: validation, next-run computation, and CRUD.
//!
//! Times are discrete minutes within a weekday; once loaded they are matched
//! as integers in `[0, 1440)`, never as wall-clock strings. Day numbering
//! follows the convention `0 = Sunday`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anchora_tenant::TenancyStore;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::log::{LogStatus, LogStore};

/// Destination descriptor: which store the artifact lands in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    /// Store kind, e.g. `"google_drive"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Store-specific settings.
    #[serde(default)]
    pub config: Value,
}

impl Default for Destination {
    fn default() -> Self {
        Self {
            kind: "google_drive".to_string(),
            config: Value::Null,
        }
    }
}

/// Weekly firing pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklySchedule {
    /// Weekdays the schedule fires on; `0 = Sunday`. Never empty.
    pub days: BTreeSet<u8>,
    /// Times of day as `HH:MM`. Never empty.
    pub times: Vec<String>,
    /// IANA zone the days/times are interpreted in.
    pub timezone: String,
    /// Opt-in recovery of a missed previous-day firing.
    #[serde(default)]
    pub catch_up_previous_day: bool,
}

/// A recurring backup policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSchedule {
    /// Unique schedule ID
    pub id: String,
    /// Owning organization
    pub organization_id: String,
    /// Connection to back up through
    pub connection_id: String,
    /// Database to back up
    pub database_name: String,
    /// Explicit collections; empty means all non-system collections
    pub collections: Vec<String>,
    /// Artifact destination
    pub destination: Destination,
    /// Firing pattern
    pub schedule: WeeklySchedule,
    /// How many success artifacts to keep
    pub retention_count: u32,
    /// Whether the scheduler considers this schedule
    pub enabled: bool,
    /// Admin who created the schedule
    pub created_by: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Start of the most recent execution
    pub last_run: Option<DateTime<Utc>>,
    /// Next planned firing; `None` while disabled
    pub next_run: Option<DateTime<Utc>>,
}

/// Input for creating a schedule.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub connection_id: String,
    pub database_name: String,
    pub collections: Vec<String>,
    pub destination: Destination,
    pub schedule: WeeklySchedule,
    pub retention_count: Option<u32>,
    pub enabled: bool,
}

/// Partial update; `None` fields are left untouched. The owning
/// organization can never change.
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub connection_id: Option<String>,
    pub database_name: Option<String>,
    pub collections: Option<Vec<String>>,
    pub destination: Option<Destination>,
    pub schedule: Option<WeeklySchedule>,
    pub retention_count: Option<u32>,
}

/// Listing entry: the schedule joined with its most recent run.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleView {
    pub schedule: BackupSchedule,
    pub last_run: Option<LastRun>,
}

/// Most recent execution, for display.
#[derive(Debug, Clone, Serialize)]
pub struct LastRun {
    pub started_at: DateTime<Utc>,
    pub status: LogStatus,
}

/// Schedule store, admin-gated through the tenancy predicates.
pub struct ScheduleStore {
    tenancy: Arc<TenancyStore>,
    logs: Arc<LogStore>,
    default_retention_count: u32,
    schedules: RwLock<HashMap<String, BackupSchedule>>,
}

impl ScheduleStore {
    /// Create an empty schedule store.
    pub fn new(tenancy: Arc<TenancyStore>, logs: Arc<LogStore>, default_retention_count: u32) -> Self {
        Self {
            tenancy,
            logs,
            default_retention_count,
            schedules: RwLock::new(HashMap::new()),
        }
    }

    /// Create a schedule. Admin-only.
    pub async fn create(
        &self,
        admin_id: &str,
        org_id: &str,
        input: NewSchedule,
    ) -> EngineResult<BackupSchedule> {
        self.tenancy.require_admin(admin_id, org_id).await?;
        validate_weekly(&input.schedule)?;

        let retention_count = input.retention_count.unwrap_or(self.default_retention_count);
        if retention_count < 1 {
            return Err(EngineError::Validation(
                "Retention count must be at least 1".to_string(),
            ));
        }

        let now = Utc::now();
        let schedule = BackupSchedule {
            id: Uuid::new_v4().to_string(),
            organization_id: org_id.to_string(),
            connection_id: input.connection_id,
            database_name: input.database_name,
            collections: input.collections,
            destination: input.destination,
            next_run: if input.enabled {
                compute_next_run(&input.schedule, now)
            } else {
                None
            },
            schedule: input.schedule,
            retention_count,
            enabled: input.enabled,
            created_by: admin_id.to_string(),
            created_at: now,
            last_run: None,
        };

        self.schedules
            .write()
            .await
            .insert(schedule.id.clone(), schedule.clone());
        info!(schedule_id = %schedule.id, org_id = %org_id, "schedule created");
        Ok(schedule)
    }

    /// Update a schedule in place. Admin-only; `next_run` is recomputed.
    pub async fn update(
        &self,
        admin_id: &str,
        org_id: &str,
        schedule_id: &str,
        update: ScheduleUpdate,
    ) -> EngineResult<BackupSchedule> {
        self.tenancy.require_admin(admin_id, org_id).await?;
        if let Some(weekly) = &update.schedule {
            validate_weekly(weekly)?;
        }
        if let Some(retention) = update.retention_count {
            if retention < 1 {
                return Err(EngineError::Validation(
                    "Retention count must be at least 1".to_string(),
                ));
            }
        }

        let mut schedules = self.schedules.write().await;
        let schedule = schedules
            .get_mut(schedule_id)
            .filter(|s| s.organization_id == org_id)
            .ok_or_else(|| EngineError::NotFound("Schedule".to_string()))?;

        if let Some(connection_id) = update.connection_id {
            schedule.connection_id = connection_id;
        }
        if let Some(database_name) = update.database_name {
            schedule.database_name = database_name;
        }
        if let Some(collections) = update.collections {
            schedule.collections = collections;
        }
        if let Some(destination) = update.destination {
            schedule.destination = destination;
        }
        if let Some(weekly) = update.schedule {
            schedule.schedule = weekly;
        }
        if let Some(retention) = update.retention_count {
            schedule.retention_count = retention;
        }
        schedule.next_run = if schedule.enabled {
            compute_next_run(&schedule.schedule, Utc::now())
        } else {
            None
        };
        Ok(schedule.clone())
    }

    /// Toggle a schedule; enabling recomputes `next_run`, disabling clears it.
    pub async fn set_enabled(
        &self,
        admin_id: &str,
        org_id: &str,
        schedule_id: &str,
        enabled: bool,
    ) -> EngineResult<BackupSchedule> {
        self.tenancy.require_admin(admin_id, org_id).await?;

        let mut schedules = self.schedules.write().await;
        let schedule = schedules
            .get_mut(schedule_id)
            .filter(|s| s.organization_id == org_id)
            .ok_or_else(|| EngineError::NotFound("Schedule".to_string()))?;

        schedule.enabled = enabled;
        schedule.next_run = if enabled {
            compute_next_run(&schedule.schedule, Utc::now())
        } else {
            None
        };
        info!(schedule_id = %schedule_id, enabled, "schedule toggled");
        Ok(schedule.clone())
    }

    /// Delete a schedule. Admin-only.
    pub async fn delete(&self, admin_id: &str, org_id: &str, schedule_id: &str) -> EngineResult<()> {
        self.tenancy.require_admin(admin_id, org_id).await?;

        let mut schedules = self.schedules.write().await;
        match schedules.get(schedule_id) {
            Some(s) if s.organization_id == org_id => {
                schedules.remove(schedule_id);
                Ok(())
            }
            _ => Err(EngineError::NotFound("Schedule".to_string())),
        }
    }

    /// List schedules visible to the caller, joined with their latest run.
    ///
    /// Admins see every schedule; members see those whose connection they
    /// have been granted.
    pub async fn list(&self, user_id: &str, org_id: &str) -> EngineResult<Vec<ScheduleView>> {
        self.tenancy.require_member(user_id, org_id).await?;

        let schedules = self.schedules.read().await;
        let mut views = Vec::new();
        for schedule in schedules.values() {
            if schedule.organization_id != org_id {
                continue;
            }
            if !self
                .tenancy
                .can_access_connection(user_id, &schedule.connection_id, org_id)
                .await
            {
                continue;
            }
            let last_run = self
                .logs
                .latest_for_schedule(&schedule.id)
                .await
                .map(|log| LastRun {
                    started_at: log.started_at,
                    status: log.status,
                });
            views.push(ScheduleView {
                schedule: schedule.clone(),
                last_run,
            });
        }
        views.sort_by(|a, b| a.schedule.created_at.cmp(&b.schedule.created_at));
        Ok(views)
    }

    /// Load a schedule without a permission check. Internal API for the
    /// executor, which runs its own gate.
    pub async fn get(&self, schedule_id: &str) -> Option<BackupSchedule> {
        self.schedules.read().await.get(schedule_id).cloned()
    }

    /// Every enabled schedule, across organizations. Scheduler-loop input.
    pub async fn enabled_schedules(&self) -> Vec<BackupSchedule> {
        self.schedules
            .read()
            .await
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect()
    }

    /// Record that an execution started, advancing `last_run`/`next_run`.
    pub async fn record_run(&self, schedule_id: &str, started_at: DateTime<Utc>) {
        let mut schedules = self.schedules.write().await;
        if let Some(schedule) = schedules.get_mut(schedule_id) {
            schedule.last_run = Some(started_at);
            if schedule.enabled {
                schedule.next_run = compute_next_run(&schedule.schedule, started_at);
            }
        }
    }

    /// Drop every schedule owned by an organization, returning their ids.
    pub async fn purge_organization(&self, org_id: &str) -> Vec<String> {
        let mut schedules = self.schedules.write().await;
        let doomed: Vec<String> = schedules
            .values()
            .filter(|s| s.organization_id == org_id)
            .map(|s| s.id.clone())
            .collect();
        for id in &doomed {
            schedules.remove(id);
        }
        doomed
    }
}

// ---- time primitives shared with the evaluator ----

/// Parse `HH:MM` (one- or two-digit hour, two-digit minute) into minutes
/// since midnight.
pub(crate) fn minutes_of(time: &str) -> Option<u16> {
    let (hours, minutes) = time.split_once(':')?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return None;
    }
    if !hours.bytes().all(|b| b.is_ascii_digit()) || !minutes.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: u16 = hours.parse().ok()?;
    let minutes: u16 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Resolve the effective scheduling zone; unknown names fall back to UTC.
pub(crate) fn effective_zone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = %name, "unknown timezone, falling back to UTC");
            Tz::UTC
        }
    }
}

/// Weekday number with `0 = Sunday`.
pub(crate) fn weekday_number(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Zone-local instant for a date at `minutes` past midnight, as UTC.
/// DST gaps shift forward to the earliest valid instant.
pub(crate) fn zone_instant(date: NaiveDate, minutes: u16, tz: Tz) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(u32::from(minutes / 60), u32::from(minutes % 60), 0)?;
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        chrono::LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        // Inside a spring-forward gap; the hour after is the firing wall.
        chrono::LocalResult::None => {
            let shifted = naive + chrono::Duration::hours(1);
            match tz.from_local_datetime(&shifted) {
                chrono::LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
                chrono::LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
                chrono::LocalResult::None => None,
            }
        }
    }
}

/// Zone-local midnight of a date, as UTC.
pub(crate) fn zone_midnight(date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    zone_instant(date, 0, tz)
}

/// Minutes past zone-local midnight of an instant.
pub(crate) fn zone_minutes(at: DateTime<Utc>, tz: Tz) -> u16 {
    let local = at.with_timezone(&tz);
    (local.hour() * 60 + local.minute()) as u16
}

/// Earliest upcoming `(day, time)` of the pattern strictly after `now`.
pub fn compute_next_run(weekly: &WeeklySchedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let tz = effective_zone(&weekly.timezone);
    let local_now = now.with_timezone(&tz);

    let mut minutes: Vec<u16> = weekly.times.iter().filter_map(|t| minutes_of(t)).collect();
    minutes.sort_unstable();

    // Two weeks bounds every weekly pattern.
    for day_offset in 0..14 {
        let date = local_now.date_naive() + chrono::Duration::days(day_offset);
        if !weekly.days.contains(&weekday_number(date)) {
            continue;
        }
        for &minute in &minutes {
            if let Some(candidate) = zone_instant(date, minute, tz) {
                if candidate > now {
                    return Some(candidate);
                }
            }
        }
    }
    None
}

fn validate_weekly(weekly: &WeeklySchedule) -> EngineResult<()> {
    if weekly.days.is_empty() {
        return Err(EngineError::Validation(
            "Schedule needs at least one day".to_string(),
        ));
    }
    if let Some(bad) = weekly.days.iter().find(|d| **d > 6) {
        return Err(EngineError::Validation(format!(
            "Day out of range: {}",
            bad
        )));
    }
    if weekly.times.is_empty() {
        return Err(EngineError::Validation(
            "Schedule needs at least one time".to_string(),
        ));
    }
    if let Some(bad) = weekly.times.iter().find(|t| minutes_of(t).is_none()) {
        return Err(EngineError::Validation(format!(
            "Invalid time: {}",
            bad
        )));
    }
    effective_zone(&weekly.timezone);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchora_vault::CredentialVault;

    fn weekly(days: &[u8], times: &[&str], timezone: &str) -> WeeklySchedule {
        WeeklySchedule {
            days: days.iter().copied().collect(),
            times: times.iter().map(|t| t.to_string()).collect(),
            timezone: timezone.to_string(),
            catch_up_previous_day: false,
        }
    }

    async fn fixture() -> (ScheduleStore, String) {
        let vault = Arc::new(CredentialVault::new("test-master-key").unwrap());
        let tenancy = Arc::new(TenancyStore::new(vault));
        let org_id = tenancy
            .create_organization("admin-1", "Acme", "backup-pw")
            .await
            .unwrap();
        let store = ScheduleStore::new(tenancy, Arc::new(LogStore::new()), 7);
        (store, org_id)
    }

    fn new_schedule(weekly: WeeklySchedule) -> NewSchedule {
        NewSchedule {
            connection_id: "conn-1".to_string(),
            database_name: "app".to_string(),
            collections: Vec::new(),
            destination: Destination::default(),
            schedule: weekly,
            retention_count: Some(3),
            enabled: true,
        }
    }

    #[test]
    fn test_minutes_of_accepts_schedule_grammar() {
        assert_eq!(minutes_of("00:00"), Some(0));
        assert_eq!(minutes_of("9:30"), Some(570));
        assert_eq!(minutes_of("09:30"), Some(570));
        assert_eq!(minutes_of("23:59"), Some(1439));

        assert_eq!(minutes_of("24:00"), None);
        assert_eq!(minutes_of("12:60"), None);
        assert_eq!(minutes_of("12:5"), None);
        assert_eq!(minutes_of("12"), None);
        assert_eq!(minutes_of("ab:cd"), None);
        assert_eq!(minutes_of("123:00"), None);
    }

    #[test]
    fn test_next_run_lands_on_scheduled_minute() {
        // Tuesday 2026-03-03 12:00 UTC; schedule fires Tuesdays at 14:00 UTC.
        let now = Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).unwrap();
        let next = compute_next_run(&weekly(&[2], &["14:00"], "UTC"), now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 3, 14, 0, 0).unwrap());

        // Past today's time: rolls to next Tuesday.
        let later = Utc.with_ymd_and_hms(2026, 3, 3, 15, 0, 0).unwrap();
        let next = compute_next_run(&weekly(&[2], &["14:00"], "UTC"), later).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 10, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_next_run_respects_timezone() {
        // 06:00 UTC on a Tuesday is 01:00 in New York (UTC-5 in March
        // before DST). A 09:00 New York schedule is 14:00 UTC.
        let now = Utc.with_ymd_and_hms(2026, 3, 3, 6, 0, 0).unwrap();
        let next =
            compute_next_run(&weekly(&[2], &["09:00"], "America/New_York"), now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 3, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_next_run_picks_earliest_of_multiple_times() {
        let now = Utc.with_ymd_and_hms(2026, 3, 3, 12, 30, 0).unwrap();
        let next =
            compute_next_run(&weekly(&[2], &["18:00", "13:00", "06:00"], "UTC"), now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 3, 13, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_create_validates_pattern() {
        let (store, org) = fixture().await;

        let mut bad_days = new_schedule(weekly(&[], &["14:00"], "UTC"));
        bad_days.schedule.days.clear();
        assert!(matches!(
            store.create("admin-1", &org, bad_days).await,
            Err(EngineError::Validation(_))
        ));

        assert!(matches!(
            store
                .create("admin-1", &org, new_schedule(weekly(&[2], &["25:00"], "UTC")))
                .await,
            Err(EngineError::Validation(_))
        ));

        assert!(matches!(
            store
                .create("admin-1", &org, new_schedule(weekly(&[7], &["14:00"], "UTC")))
                .await,
            Err(EngineError::Validation(_))
        ));

        let mut no_retention = new_schedule(weekly(&[2], &["14:00"], "UTC"));
        no_retention.retention_count = Some(0);
        assert!(matches!(
            store.create("admin-1", &org, no_retention).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_create_requires_admin_and_sets_next_run() {
        let (store, org) = fixture().await;

        assert!(matches!(
            store
                .create("stranger", &org, new_schedule(weekly(&[2], &["14:00"], "UTC")))
                .await,
            Err(EngineError::PermissionDenied)
        ));

        let schedule = store
            .create("admin-1", &org, new_schedule(weekly(&[2], &["14:00"], "UTC")))
            .await
            .unwrap();
        assert!(schedule.enabled);
        assert!(schedule.next_run.is_some());
        assert_eq!(schedule.retention_count, 3);
    }

    #[tokio::test]
    async fn test_toggle_clears_and_recomputes_next_run() {
        let (store, org) = fixture().await;
        let schedule = store
            .create("admin-1", &org, new_schedule(weekly(&[2], &["14:00"], "UTC")))
            .await
            .unwrap();

        let disabled = store
            .set_enabled("admin-1", &org, &schedule.id, false)
            .await
            .unwrap();
        assert!(!disabled.enabled);
        assert!(disabled.next_run.is_none());

        let enabled = store
            .set_enabled("admin-1", &org, &schedule.id, true)
            .await
            .unwrap();
        assert!(enabled.next_run.is_some());
    }

    #[tokio::test]
    async fn test_update_cannot_cross_organizations() {
        let (store, org) = fixture().await;
        let schedule = store
            .create("admin-1", &org, new_schedule(weekly(&[2], &["14:00"], "UTC")))
            .await
            .unwrap();

        // A different org id never matches the stored schedule.
        let err = store
            .update("admin-1", "other-org", &schedule.id, ScheduleUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::PermissionDenied | EngineError::NotFound(_)
        ));

        let updated = store
            .update(
                "admin-1",
                &org,
                &schedule.id,
                ScheduleUpdate {
                    retention_count: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.retention_count, 5);
        assert_eq!(updated.organization_id, org);
    }

    #[tokio::test]
    async fn test_default_retention_applied() {
        let (store, org) = fixture().await;
        let mut input = new_schedule(weekly(&[2], &["14:00"], "UTC"));
        input.retention_count = None;
        let schedule = store.create("admin-1", &org, input).await.unwrap();
        assert_eq!(schedule.retention_count, 7);
    }
}
