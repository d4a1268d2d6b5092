//! Scheduler (spec §4.H): a daily 07:00 America/Chicago trigger for the
//! Pipeline Executor, a job registry, and an execution monitor that
//! detects jobs running past their timeout.

pub mod registry;

use crate::pipeline::PipelineExecutor;
use crate::time::{localize, now_in, SCHEDULE_TIMEZONE};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use registry::{JobRecord, JobRegistry, JobStatus, JobType};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const MISFIRE_GRACE: ChronoDuration = ChronoDuration::seconds(60);
pub const MONITOR_CHECK_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 3600;
pub const DAILY_FIRE_HOUR: u32 = 7;

/// Computes the next daily 07:00 America/Chicago fire time strictly after
/// `after`, handling DST transitions via `time::localize`.
pub fn next_daily_fire(after: DateTime<Utc>) -> DateTime<Utc> {
    let local_after = after.with_timezone(&SCHEDULE_TIMEZONE);
    let fire_time = NaiveTime::from_hms_opt(DAILY_FIRE_HOUR, 0, 0).expect("valid time");
    let mut candidate_date = local_after.date_naive();
    loop {
        let candidate_naive = candidate_date.and_time(fire_time);
        let candidate = localize(candidate_naive, SCHEDULE_TIMEZONE);
        if candidate.with_timezone(&Utc) > after {
            return candidate.with_timezone(&Utc);
        }
        candidate_date = candidate_date.succ_opt().expect("calendar never overflows in practice");
    }
}

/// Whether a job that was due at `scheduled_for` and is only now being
/// considered at `now` still qualifies to run under `misfire_grace_time`
/// (spec §4.H: coalesce=true collapses any missed window into one run).
pub fn within_misfire_grace(scheduled_for: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - scheduled_for <= MISFIRE_GRACE
}

/// Drives the daily trigger and execution monitor loop. `max_instances = 1`
/// is enforced by `PipelineExecutor` itself; the scheduler only decides
/// *when* to call `run_cycle`.
pub struct Scheduler {
    executor: Arc<PipelineExecutor>,
    registry: Arc<JobRegistry>,
}

impl Scheduler {
    pub fn new(executor: Arc<PipelineExecutor>, registry: Arc<JobRegistry>) -> Self {
        Self { executor, registry }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Triggers an out-of-band run, bypassing the daily schedule, for
    /// manual operator invocation (spec §4.H / §6.3 `run` subcommand).
    pub async fn run_now(&self, target_date: chrono::NaiveDate) -> JobRecord {
        let job_id = Uuid::new_v4().to_string();
        self.registry.register(JobRecord {
            id: job_id.clone(),
            job_type: JobType::Manual,
            scheduled_for: Utc::now(),
            status: JobStatus::Running,
            started_at: Some(Utc::now()),
            finished_at: None,
        });

        match self.executor.run_cycle(target_date).await {
            Ok(_report) => {
                self.registry.update_status(&job_id, JobStatus::Completed);
            }
            Err(err) => {
                error!(error = %err, "manual run failed");
                self.registry.update_status(&job_id, JobStatus::Failed);
            }
        }
        self.registry.get(&job_id).expect("just inserted")
    }

    /// Spawns the background loop that fires the daily job and separately
    /// sweeps the registry every `MONITOR_CHECK_INTERVAL` for jobs that
    /// have been running longer than `DEFAULT_TIMEOUT_SECONDS`.
    pub fn spawn(self: Arc<Self>) {
        let trigger_self = self.clone();
        tokio::spawn(async move {
            trigger_self.daily_trigger_loop().await;
        });

        let monitor_self = self.clone();
        tokio::spawn(async move {
            monitor_self.execution_monitor_loop().await;
        });
    }

    async fn daily_trigger_loop(&self) {
        loop {
            let now = Utc::now();
            let next_fire = next_daily_fire(now);
            let wait = (next_fire - now).to_std().unwrap_or(Duration::from_secs(0));
            tokio::time::sleep(wait).await;

            let fire_now = Utc::now();
            if !within_misfire_grace(next_fire, fire_now) {
                warn!(scheduled_for = %next_fire, "daily trigger missed its grace window, skipping this cycle");
                continue;
            }

            let job_id = Uuid::new_v4().to_string();
            self.registry.register(JobRecord {
                id: job_id.clone(),
                job_type: JobType::Daily,
                scheduled_for: next_fire,
                status: JobStatus::Running,
                started_at: Some(Utc::now()),
                finished_at: None,
            });

            info!(job_id, scheduled_for = %next_fire, "daily pipeline cycle starting");
            let target_date = next_fire.with_timezone(&SCHEDULE_TIMEZONE).date_naive();
            match self.executor.run_cycle(target_date).await {
                Ok(_) => self.registry.update_status(&job_id, JobStatus::Completed),
                Err(err) => {
                    error!(job_id, error = %err, "daily pipeline cycle failed");
                    self.registry.update_status(&job_id, JobStatus::Failed);
                }
            }
        }
    }

    /// Lazily starts on first `spawn`, self-stops are not modeled since the
    /// scheduler owns the process lifetime; it simply idles when there are
    /// no running jobs.
    async fn execution_monitor_loop(&self) {
        let mut interval = tokio::time::interval(MONITOR_CHECK_INTERVAL);
        loop {
            interval.tick().await;
            let now = Utc::now();
            for job in self.registry.list_by_status(JobStatus::Running) {
                if let Some(started_at) = job.started_at {
                    let elapsed = now - started_at;
                    if elapsed > ChronoDuration::seconds(DEFAULT_TIMEOUT_SECONDS) {
                        warn!(job_id = %job.id, elapsed_seconds = elapsed.num_seconds(), "job exceeded default timeout");
                        self.registry.update_status(&job.id, JobStatus::TimedOut);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_daily_fire_is_strictly_after_given_instant() {
        let now = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        let next = next_daily_fire(now);
        assert!(next > now);
    }

    #[test]
    fn next_daily_fire_rolls_to_tomorrow_if_already_past_today() {
        let now = Utc.with_ymd_and_hms(2023, 6, 1, 20, 0, 0).unwrap();
        let next = next_daily_fire(now);
        let local = next.with_timezone(&SCHEDULE_TIMEZONE);
        assert_eq!(local.date_naive(), chrono::NaiveDate::from_ymd_opt(2023, 6, 2).unwrap());
    }

    #[test]
    fn misfire_grace_accepts_small_delay_rejects_large() {
        let scheduled = Utc.with_ymd_and_hms(2023, 6, 1, 7, 0, 0).unwrap();
        assert!(within_misfire_grace(scheduled, scheduled + ChronoDuration::seconds(30)));
        assert!(!within_misfire_grace(scheduled, scheduled + ChronoDuration::seconds(120)));
    }
}
