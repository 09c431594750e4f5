//! Cron-driven execution of the reminder sweep.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use cron::Schedule;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ReminderConfig;
use crate::db::DbHandle;
use crate::errors::{ScheduleError, SweepError};
use crate::realtime::RoomRouter;

use super::{SweepReport, run_sweep};

const REMINDER_JOB: &str = "task_reminder";

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub schedule: String,
    pub running: bool,
}

struct Job {
    schedule: String,
    handle: JoinHandle<()>,
}

/// Name-keyed registry of recurring reminder jobs.
///
/// Sweeps are not serialized: a manual trigger may overlap a scheduled
/// firing, which can duplicate notifications but cannot corrupt state
/// (the pipeline is read-only over tasks).
pub struct ReminderScheduler {
    db: DbHandle,
    router: Arc<RoomRouter>,
    config: ReminderConfig,
    jobs: Mutex<HashMap<String, Job>>,
}

impl ReminderScheduler {
    pub fn new(db: DbHandle, router: Arc<RoomRouter>, config: ReminderConfig) -> Self {
        Self {
            db,
            router,
            config,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Register the recurring reminder job. No-op when reminders are
    /// disabled; an invalid schedule expression is logged as an error and
    /// the job is simply not registered — the service keeps running.
    pub fn initialize(&self) {
        if !self.config.enabled {
            warn!("reminder jobs are disabled in configuration");
            return;
        }
        if self.jobs().contains_key(REMINDER_JOB) {
            warn!(job = REMINDER_JOB, "reminder job already registered");
            return;
        }

        let schedule = match Schedule::from_str(&self.config.schedule) {
            Ok(schedule) => schedule,
            Err(source) => {
                let err = ScheduleError::InvalidExpression {
                    expr: self.config.schedule.clone(),
                    source,
                };
                error!(error = %err, "reminder job not registered");
                return;
            }
        };

        let db = self.db.clone();
        let router = self.router.clone();
        let config = self.config.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    warn!("schedule produced no further firing times, stopping job");
                    break;
                };
                let delay = (next - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                tokio::time::sleep(delay).await;

                info!(job = REMINDER_JOB, "running scheduled reminder sweep");
                if let Err(e) = run_sweep(&db, &router, &config).await {
                    // The job stays registered; the next firing proceeds.
                    error!(job = REMINDER_JOB, error = %e, "scheduled sweep failed");
                }
            }
        });

        self.jobs().insert(
            REMINDER_JOB.to_string(),
            Job {
                schedule: self.config.schedule.clone(),
                handle,
            },
        );
        info!(
            job = REMINDER_JOB,
            schedule = %self.config.schedule,
            "reminder job scheduled"
        );
    }

    /// Run the sweep pipeline immediately, outside the schedule.
    pub async fn trigger_now(&self) -> Result<SweepReport, SweepError> {
        info!("manually triggering task reminders");
        run_sweep(&self.db, &self.router, &self.config).await
    }

    /// Status of every registered job.
    pub fn status(&self) -> Vec<JobStatus> {
        self.jobs()
            .iter()
            .map(|(name, job)| JobStatus {
                name: name.clone(),
                schedule: job.schedule.clone(),
                running: !job.handle.is_finished(),
            })
            .collect()
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Cancel every registered job. Idempotent; in-flight sweeps are not
    /// interrupted, only future firings are prevented.
    pub fn stop_all(&self) {
        let mut jobs = self.jobs();
        for (name, job) in jobs.drain() {
            job.handle.abort();
            info!(job = %name, "stopped reminder job");
        }
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Job>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("job registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TaskDb;

    fn scheduler(config: ReminderConfig) -> ReminderScheduler {
        let db = DbHandle::new(TaskDb::new_in_memory().unwrap());
        ReminderScheduler::new(db, Arc::new(RoomRouter::new()), config)
    }

    fn enabled_config(schedule: &str) -> ReminderConfig {
        ReminderConfig {
            enabled: true,
            schedule: schedule.to_string(),
            threshold_hours: 24,
        }
    }

    #[tokio::test]
    async fn initialize_registers_job_when_enabled() {
        let s = scheduler(enabled_config("0 0 8 * * *"));
        s.initialize();
        let status = s.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].name, "task_reminder");
        assert_eq!(status[0].schedule, "0 0 8 * * *");
        assert!(status[0].running);
        s.stop_all();
    }

    #[tokio::test]
    async fn initialize_twice_keeps_the_original_job() {
        let s = scheduler(enabled_config("0 0 8 * * *"));
        s.initialize();
        s.initialize();
        let status = s.status();
        assert_eq!(status.len(), 1);
        assert!(status[0].running);
        s.stop_all();
        assert!(s.status().is_empty());
    }

    #[tokio::test]
    async fn initialize_is_a_noop_when_disabled() {
        let s = scheduler(ReminderConfig {
            enabled: false,
            ..ReminderConfig::default()
        });
        s.initialize();
        assert!(s.status().is_empty());
    }

    #[tokio::test]
    async fn invalid_schedule_expression_registers_nothing() {
        let s = scheduler(enabled_config("every tuesday at dawn"));
        s.initialize();
        assert!(s.status().is_empty());
    }

    #[tokio::test]
    async fn stop_all_is_idempotent() {
        let s = scheduler(enabled_config("0 0 8 * * *"));
        s.initialize();
        s.stop_all();
        s.stop_all();
        assert!(s.status().is_empty());
    }

    #[tokio::test]
    async fn trigger_now_runs_on_empty_store() {
        let s = scheduler(enabled_config("0 0 8 * * *"));
        let report = s.trigger_now().await.unwrap();
        assert_eq!(report.total_tasks, 0);
        assert_eq!(report.total_users, 0);
    }

    #[tokio::test]
    async fn trigger_now_works_without_initialize() {
        // Manual trigger is independent of job registration.
        let s = scheduler(ReminderConfig {
            enabled: false,
            ..ReminderConfig::default()
        });
        assert!(s.trigger_now().await.is_ok());
    }
}
