//! Scheduled stale-task reminders.
//!
//! | Module      | Responsibility                                          |
//! |-------------|---------------------------------------------------------|
//! | `aggregate` | Group stale tasks by owner, ages, reminder payloads     |
//! | `scheduler` | Cron-driven job registry: initialize/trigger/status/stop|
//!
//! One sweep = staleness scan → aggregate → fan out: each affected user's
//! room gets its own reminder and the admins room gets one aggregate
//! summary. Sweeps are read-only over task data, so overlapping sweeps
//! (manual trigger during a scheduled firing) can at worst duplicate
//! notifications.

pub mod aggregate;
pub mod scheduler;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ReminderConfig;
use crate::db::DbHandle;
use crate::errors::SweepError;
use crate::realtime::{ADMIN_ROOM, EmitTarget, RoomRouter, ServerEvent, user_room};

pub use scheduler::{JobStatus, ReminderScheduler};

/// Outcome of one sweep, surfaced by the manual trigger endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub total_tasks: usize,
    pub total_users: usize,
    pub timestamp: DateTime<Utc>,
}

/// Run one sweep: scan for stale tasks, aggregate per owner, and emit
/// reminders through the router.
///
/// The staleness cutoff is recomputed from the current time on every
/// invocation. Emission is best-effort; only the scan can fail the sweep.
pub async fn run_sweep(
    db: &DbHandle,
    router: &RoomRouter,
    config: &ReminderConfig,
) -> Result<SweepReport, SweepError> {
    let now = Utc::now();
    let cutoff = now - Duration::hours(config.threshold_hours);

    let stale = db
        .call(move |db| db.find_stale(cutoff))
        .await
        .map_err(SweepError::Scan)?;

    if stale.is_empty() {
        info!(
            threshold_hours = config.threshold_hours,
            "no incomplete tasks need reminders"
        );
        return Ok(SweepReport {
            total_tasks: 0,
            total_users: 0,
            timestamp: now,
        });
    }

    info!(
        count = stale.len(),
        threshold_hours = config.threshold_hours,
        "found incomplete tasks for reminders"
    );

    let groups = aggregate::group_by_owner(stale);

    // Resolve owner emails; an individual failure downgrades that user to
    // the placeholder instead of aborting the batch.
    let user_ids: Vec<i64> = groups.iter().map(|(uid, _)| *uid).collect();
    let emails = db
        .call(move |db| {
            let mut emails = HashMap::new();
            for uid in user_ids {
                match db.get_user(uid) {
                    Ok(Some(user)) => {
                        emails.insert(uid, user.email);
                    }
                    Ok(None) => warn!(user_id = uid, "stale task owner not found"),
                    Err(e) => warn!(user_id = uid, error = %e, "owner lookup failed"),
                }
            }
            Ok(emails)
        })
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "identity resolution unavailable, using placeholders");
            HashMap::new()
        });

    let (per_user, admin) =
        aggregate::build_reminders(&groups, &emails, now, config.threshold_hours);

    for summary in &admin.user_summaries {
        info!(
            user_id = summary.user_id,
            email = %summary.email,
            tasks = summary.task_count,
            "sending task reminders"
        );
    }

    let report = SweepReport {
        total_tasks: admin.summary.total_tasks,
        total_users: admin.summary.total_users,
        timestamp: now,
    };

    for (user_id, reminders) in per_user {
        router.emit(
            EmitTarget::Room(&user_room(user_id)),
            &ServerEvent::UserTaskReminders(reminders),
        );
    }
    router.emit(
        EmitTarget::Room(ADMIN_ROOM),
        &ServerEvent::AdminTaskReminders(admin),
    );

    info!(
        total_tasks = report.total_tasks,
        total_users = report.total_users,
        "task reminders sent"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Identity, Role};
    use crate::db::TaskDb;
    use crate::realtime::ConnectionId;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn connect(
        router: &RoomRouter,
        user_id: i64,
        role: Role,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        router.register(
            id,
            Identity {
                user_id,
                email: format!("u{}@example.com", user_id),
                role,
            },
            tx,
        );
        (id, rx)
    }

    fn seeded_db() -> (DbHandle, i64, i64) {
        let db = TaskDb::new_in_memory().unwrap();
        let alice = db.create_user("alice@example.com", Role::User).unwrap();
        let bob = db.create_user("bob@example.com", Role::User).unwrap();
        let now = Utc::now();
        db.create_task_at(alice.id, "old A", "", now - Duration::hours(30))
            .unwrap();
        db.create_task_at(alice.id, "old B", "", now - Duration::hours(26))
            .unwrap();
        db.create_task_at(bob.id, "old C", "", now - Duration::hours(48))
            .unwrap();
        db.create_task_at(bob.id, "fresh", "", now - Duration::hours(1))
            .unwrap();
        (DbHandle::new(db), alice.id, bob.id)
    }

    fn config() -> ReminderConfig {
        ReminderConfig {
            enabled: true,
            schedule: "0 0 8 * * *".to_string(),
            threshold_hours: 24,
        }
    }

    #[tokio::test]
    async fn sweep_routes_reminders_to_owners_and_admins() {
        let (db, alice, bob) = seeded_db();
        let router = RoomRouter::new();
        let (_a, mut alice_rx) = connect(&router, alice, Role::User);
        let (_b, mut bob_rx) = connect(&router, bob, Role::User);
        let (_adm, mut admin_rx) = connect(&router, 999, Role::Admin);

        let report = run_sweep(&db, &router, &config()).await.unwrap();
        assert_eq!(report.total_tasks, 3);
        assert_eq!(report.total_users, 2);

        let alice_msg: serde_json::Value =
            serde_json::from_str(&alice_rx.try_recv().unwrap()).unwrap();
        assert_eq!(alice_msg["event"], "userTaskReminders");
        assert_eq!(alice_msg["data"]["count"], 2);
        // Owner's room receives only the owner's tasks.
        assert!(alice_rx.try_recv().is_err());

        let bob_msg: serde_json::Value =
            serde_json::from_str(&bob_rx.try_recv().unwrap()).unwrap();
        assert_eq!(bob_msg["data"]["count"], 1);
        assert_eq!(bob_msg["data"]["tasks"][0]["title"], "old C");

        let admin_msg: serde_json::Value =
            serde_json::from_str(&admin_rx.try_recv().unwrap()).unwrap();
        assert_eq!(admin_msg["event"], "adminTaskReminders");
        assert_eq!(admin_msg["data"]["summary"]["totalTasks"], 3);
        assert_eq!(admin_msg["data"]["summary"]["totalUsers"], 2);
        // Scanner order is oldest-first, so bob's 48h task leads the list.
        assert_eq!(admin_msg["data"]["allTasks"][0]["email"], "bob@example.com");
        assert_eq!(admin_msg["data"]["allTasks"][0]["title"], "old C");
    }

    #[tokio::test]
    async fn sweep_with_nothing_stale_emits_nothing() {
        let db = DbHandle::new(TaskDb::new_in_memory().unwrap());
        let router = RoomRouter::new();
        let (_adm, mut admin_rx) = connect(&router, 1, Role::Admin);

        let report = run_sweep(&db, &router, &config()).await.unwrap();
        assert_eq!(report.total_tasks, 0);
        assert!(admin_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sweep_with_no_listeners_still_succeeds() {
        let (db, _, _) = seeded_db();
        let router = RoomRouter::new();
        let report = run_sweep(&db, &router, &config()).await.unwrap();
        assert_eq!(report.total_tasks, 3);
    }

    #[tokio::test]
    async fn overlapping_sweeps_both_complete() {
        let (db, _, _) = seeded_db();
        let router = std::sync::Arc::new(RoomRouter::new());
        let cfg = config();

        let (one, two) = tokio::join!(
            run_sweep(&db, &router, &cfg),
            run_sweep(&db, &router, &cfg)
        );
        assert_eq!(one.unwrap().total_tasks, 3);
        assert_eq!(two.unwrap().total_tasks, 3);
    }
}
