use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::Role;

/// A tracked work item. Owned by exactly one user; `completed` only changes
/// by explicit update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Partial update applied to a task; also echoed on the wire as the
/// `changes` field of a `taskUpdated` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl TaskChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.completed.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_serializes_camel_case() {
        let task = Task {
            id: 1,
            user_id: 2,
            title: "Write report".to_string(),
            description: "Quarterly numbers".to_string(),
            completed: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"userId\":2"));
        assert!(json.contains("\"createdAt\""));
        assert!(!json.contains("user_id"));
    }

    #[test]
    fn task_changes_skips_unset_fields() {
        let changes = TaskChanges {
            completed: Some(true),
            ..Default::default()
        };
        let json = serde_json::to_string(&changes).unwrap();
        assert_eq!(json, "{\"completed\":true}");
        assert!(!changes.is_empty());
        assert!(TaskChanges::default().is_empty());
    }
}
