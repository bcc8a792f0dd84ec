//! Due-schedule evaluation.
//!
//! A discrete-minute matcher, not a cron engine: times have minute
//! resolution, and overdue recovery is bounded by the current day in the
//! schedule's zone (optionally the previous day under the carry-over
//! policy), never earlier. The evaluator is stateless; refiring across
//! process restarts is suppressed by the execution history, not by memory.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::EngineResult;
use crate::log::ExecutionHistory;
use crate::schedule::{
    effective_zone, minutes_of, weekday_number, zone_midnight, zone_minutes, BackupSchedule,
};

/// Stateless due-set computation.
pub struct ScheduleEvaluator;

impl ScheduleEvaluator {
    /// Schedules whose firing is exactly current or overdue at `now`.
    ///
    /// Deterministic given its inputs; calling it twice at one instant
    /// yields the same set. Each schedule appears at most once, however
    /// many of its times matched. A history read failure excludes that
    /// schedule for this tick and is logged, never raised.
    pub async fn due_now(
        now: DateTime<Utc>,
        schedules: &[BackupSchedule],
        history: &dyn ExecutionHistory,
    ) -> Vec<String> {
        let mut due = Vec::new();
        for schedule in schedules {
            if !schedule.enabled {
                continue;
            }
            match Self::is_due(now, schedule, history).await {
                Ok(true) => due.push(schedule.id.clone()),
                Ok(false) => {}
                Err(err) => {
                    warn!(schedule_id = %schedule.id, error = %err, "evaluator skipped schedule");
                }
            }
        }
        due
    }

    async fn is_due(
        now: DateTime<Utc>,
        schedule: &BackupSchedule,
        history: &dyn ExecutionHistory,
    ) -> EngineResult<bool> {
        let weekly = &schedule.schedule;
        let tz = effective_zone(&weekly.timezone);
        let local = now.with_timezone(&tz);
        let today = local.date_naive();

        if !weekly.days.contains(&weekday_number(today)) {
            return Ok(false);
        }

        let minute_now = i32::from(zone_minutes(now, tz));

        for time in &weekly.times {
            let target = match minutes_of(time) {
                Some(m) => i32::from(m),
                // Times are validated at store time; skip rather than fire.
                None => continue,
            };
            let delta = minute_now - target;

            if delta >= 0 {
                // Exactly current or overdue within today. A terminal run
                // that started today at or after the target minute means
                // this firing already happened.
                let start_of_today = match zone_midnight(today, tz) {
                    Some(instant) => instant,
                    None => continue,
                };
                let runs = history
                    .terminal_run_starts(&schedule.id, start_of_today, now)
                    .await?;
                let satisfied = runs
                    .iter()
                    .any(|started| i32::from(zone_minutes(*started, tz)) >= target);
                if !satisfied {
                    return Ok(true);
                }
            } else if weekly.catch_up_previous_day && delta < -720 {
                // The time is far in the future today; treat it as a missed
                // previous-day firing, if yesterday was a scheduled day.
                let yesterday = match today.pred_opt() {
                    Some(d) => d,
                    None => continue,
                };
                if !weekly.days.contains(&weekday_number(yesterday)) {
                    continue;
                }
                let (from, to) = match (zone_midnight(yesterday, tz), zone_midnight(today, tz)) {
                    (Some(from), Some(to)) => (from, to),
                    _ => continue,
                };
                if history
                    .terminal_run_starts(&schedule.id, from, to)
                    .await?
                    .is_empty()
                {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
