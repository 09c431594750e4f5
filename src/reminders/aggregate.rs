//! Reminder aggregation: group stale tasks by owner, enrich with owner
//! identity, and build the per-user and admin-wide payloads.
//!
//! For a fixed "now" and fixed stale-task input the output is fully
//! deterministic: groups appear in first-seen (scanner) order and each
//! group preserves the scanner's relative order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::Task;
use crate::realtime::events::{
    AdminReminderTask, AdminReminders, ReminderSummary, ReminderTask, UserBreakdown, UserReminders,
};

/// Placeholder email when owner identity resolution fails for a user.
pub const UNKNOWN_USER: &str = "Unknown";

/// Group stale tasks by owning user, preserving scanner order within each
/// group and first-appearance order across groups.
pub fn group_by_owner(tasks: Vec<Task>) -> Vec<(i64, Vec<Task>)> {
    let mut order: Vec<i64> = Vec::new();
    let mut groups: HashMap<i64, Vec<Task>> = HashMap::new();
    for task in tasks {
        if !groups.contains_key(&task.user_id) {
            order.push(task.user_id);
        }
        groups.entry(task.user_id).or_default().push(task);
    }
    order
        .into_iter()
        .map(|uid| {
            let tasks = groups.remove(&uid).unwrap_or_default();
            (uid, tasks)
        })
        .collect()
}

/// Whole days elapsed since creation.
pub fn days_old(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - created_at).num_days().max(0)
}

/// Human-readable elapsed age: days+hours at a day or more, hours+minutes
/// at an hour or more, minutes below that.
pub fn format_age(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now - created_at;
    let minutes = elapsed.num_minutes().max(0);
    let hours = minutes / 60;
    let days = hours / 24;

    if days >= 1 {
        format!(
            "{} {} {}",
            plural(days, "day"),
            hours % 24,
            unit(hours % 24, "hour")
        )
    } else if hours >= 1 {
        format!(
            "{} {} {}",
            plural(hours, "hour"),
            minutes % 60,
            unit(minutes % 60, "minute")
        )
    } else {
        plural(minutes, "minute")
    }
}

fn plural(n: i64, noun: &str) -> String {
    format!("{} {}", n, unit(n, noun))
}

fn unit(n: i64, noun: &str) -> String {
    if n == 1 {
        noun.to_string()
    } else {
        format!("{}s", noun)
    }
}

/// Build the addressed reminder payloads from grouped stale tasks.
///
/// `emails` maps user id to display identity; missing entries get the
/// [`UNKNOWN_USER`] placeholder rather than aborting the batch.
pub fn build_reminders(
    groups: &[(i64, Vec<Task>)],
    emails: &HashMap<i64, String>,
    now: DateTime<Utc>,
    threshold_hours: i64,
) -> (Vec<(i64, UserReminders)>, AdminReminders) {
    let mut per_user = Vec::with_capacity(groups.len());
    let mut user_summaries = Vec::with_capacity(groups.len());
    let mut all_tasks = Vec::new();
    let mut total_tasks = 0usize;

    for (user_id, tasks) in groups {
        let email = emails
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_USER.to_string());

        let reminder_tasks: Vec<ReminderTask> = tasks
            .iter()
            .map(|task| ReminderTask {
                task_id: task.id,
                title: task.title.clone(),
                description: task.description.clone(),
                created_at: task.created_at,
                age: format_age(task.created_at, now),
                days_old: days_old(task.created_at, now),
            })
            .collect();

        for task in tasks {
            all_tasks.push(AdminReminderTask {
                task_id: task.id,
                user_id: *user_id,
                email: email.clone(),
                title: task.title.clone(),
                description: task.description.clone(),
                created_at: task.created_at,
                age: format_age(task.created_at, now),
                days_old: days_old(task.created_at, now),
            });
        }

        total_tasks += tasks.len();
        user_summaries.push(UserBreakdown {
            user_id: *user_id,
            email,
            task_count: tasks.len(),
        });
        per_user.push((
            *user_id,
            UserReminders {
                count: reminder_tasks.len(),
                message: format!(
                    "You have {} incomplete {} needing attention",
                    reminder_tasks.len(),
                    unit(reminder_tasks.len() as i64, "task")
                ),
                tasks: reminder_tasks,
                timestamp: now,
            },
        ));
    }

    let admin = AdminReminders {
        message: format!(
            "{} incomplete {} across {} {} need attention",
            total_tasks,
            unit(total_tasks as i64, "task"),
            groups.len(),
            unit(groups.len() as i64, "user")
        ),
        summary: ReminderSummary {
            total_tasks,
            total_users: groups.len(),
            threshold_hours,
        },
        user_summaries,
        all_tasks,
        timestamp: now,
    };

    (per_user, admin)
}
