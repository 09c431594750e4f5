//! Typed wire contract for the realtime channel.
//!
//! Every server→client event is one variant of [`ServerEvent`], tagged with
//! the event name so the payload shape per event is enforced at compile
//! time rather than built ad hoc at each call site.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Role;
use crate::models::{Task, TaskChanges};

// ── Server → client ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Welcome acknowledgment sent to a connection once it is active.
    #[serde(rename_all = "camelCase")]
    Connected {
        user_id: i64,
        email: String,
        role: Role,
        socket_id: Uuid,
        rooms: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    NewTask {
        message: String,
        task: Task,
    },
    TaskUpdated {
        message: String,
        task: Task,
        changes: TaskChanges,
    },
    TaskCompleted {
        message: String,
        task: Task,
    },
    #[serde(rename_all = "camelCase")]
    TaskDeleted {
        message: String,
        task_id: i64,
        user_id: i64,
        deleted_at: DateTime<Utc>,
    },
    UserTaskReminders(UserReminders),
    AdminTaskReminders(AdminReminders),
    Pong {
        timestamp: DateTime<Utc>,
    },
    TestBroadcast {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ServerEvent {
    /// The wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::NewTask { .. } => "newTask",
            Self::TaskUpdated { .. } => "taskUpdated",
            Self::TaskCompleted { .. } => "taskCompleted",
            Self::TaskDeleted { .. } => "taskDeleted",
            Self::UserTaskReminders(_) => "userTaskReminders",
            Self::AdminTaskReminders(_) => "adminTaskReminders",
            Self::Pong { .. } => "pong",
            Self::TestBroadcast { .. } => "testBroadcast",
        }
    }
}

// ── Reminder payloads ────────────────────────────────────────────────

/// One stale task as presented in a reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderTask {
    pub task_id: i64,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// Human-readable elapsed age, e.g. "1 day 1 hour".
    pub age: String,
    pub days_old: i64,
}

/// Reminder delivered to one owning user's room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserReminders {
    pub count: usize,
    pub message: String,
    pub tasks: Vec<ReminderTask>,
    pub timestamp: DateTime<Utc>,
}

/// One stale task in the admin-facing full list, enriched with its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminReminderTask {
    pub task_id: i64,
    pub user_id: i64,
    pub email: String,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub age: String,
    pub days_old: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSummary {
    pub total_tasks: usize,
    pub total_users: usize,
    pub threshold_hours: i64,
}

/// Per-user breakdown line in the admin summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBreakdown {
    pub user_id: i64,
    pub email: String,
    pub task_count: usize,
}

/// Aggregate summary delivered once to the admins room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminReminders {
    pub message: String,
    pub summary: ReminderSummary,
    pub user_summaries: Vec<UserBreakdown>,
    pub all_tasks: Vec<AdminReminderTask>,
    pub timestamp: DateTime<Utc>,
}

// ── Client → server ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    Ping,
}
