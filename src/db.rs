use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::auth::Role;
use crate::models::{Task, TaskChanges, User};

/// Async-safe handle to the task store.
///
/// Wraps `TaskDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<TaskDb>>,
}

impl DbHandle {
    pub fn new(db: TaskDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&TaskDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct TaskDb {
    conn: Connection,
}

impl TaskDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL UNIQUE,
                    role TEXT NOT NULL DEFAULT 'user',
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    completed INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_stale ON tasks(completed, created_at);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── User CRUD ─────────────────────────────────────────────────────

    pub fn create_user(&self, email: &str, role: Role) -> Result<User> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO users (email, role, created_at) VALUES (?1, ?2, ?3)",
                params![email.to_lowercase(), role.as_str(), now],
            )
            .context("Failed to insert user")?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, email, role, created_at FROM users WHERE id = ?1")
            .context("Failed to prepare get_user")?;
        let mut rows = stmt
            .query_map(params![id], UserRow::from_row)
            .context("Failed to query user")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read user row")?.into_user()?)),
            None => Ok(None),
        }
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, email, role, created_at FROM users ORDER BY id")
            .context("Failed to prepare list_users")?;
        let rows = stmt
            .query_map([], UserRow::from_row)
            .context("Failed to query users")?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row.context("Failed to read user row")?.into_user()?);
        }
        Ok(users)
    }

    // ── Task CRUD ─────────────────────────────────────────────────────

    pub fn create_task(&self, user_id: i64, title: &str, description: &str) -> Result<Task> {
        self.create_task_at(user_id, title, description, Utc::now())
    }

    /// Insert a task with an explicit creation timestamp. Used by tests and
    /// backfills; `create_task` delegates here with the current time.
    pub fn create_task_at(
        &self,
        user_id: i64,
        title: &str,
        description: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Task> {
        let stamp = created_at.to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO tasks (user_id, title, description, completed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                params![user_id, title, description, stamp],
            )
            .context("Failed to insert task")?;
        let id = self.conn.last_insert_rowid();
        self.get_task(id)?.context("Task not found after insert")
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, title, description, completed, created_at, updated_at
                 FROM tasks WHERE id = ?1",
            )
            .context("Failed to prepare get_task")?;
        let mut rows = stmt
            .query_map(params![id], TaskRow::from_row)
            .context("Failed to query task")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read task row")?.into_task()?)),
            None => Ok(None),
        }
    }

    /// Tasks belonging to one user, newest first.
    pub fn list_tasks_for_user(&self, user_id: i64) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, title, description, completed, created_at, updated_at
                 FROM tasks WHERE user_id = ?1 ORDER BY created_at DESC",
            )
            .context("Failed to prepare list_tasks_for_user")?;
        let rows = stmt
            .query_map(params![user_id], TaskRow::from_row)
            .context("Failed to query tasks")?;
        collect_tasks(rows)
    }

    pub fn list_all_tasks(&self) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, title, description, completed, created_at, updated_at
                 FROM tasks ORDER BY created_at DESC",
            )
            .context("Failed to prepare list_all_tasks")?;
        let rows = stmt
            .query_map([], TaskRow::from_row)
            .context("Failed to query tasks")?;
        collect_tasks(rows)
    }

    /// Staleness scan: incomplete tasks created strictly before `cutoff`,
    /// oldest first. Pure read; the cutoff is recomputed by the caller at
    /// every invocation since "now" moves.
    pub fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, title, description, completed, created_at, updated_at
                 FROM tasks WHERE completed = 0 AND created_at < ?1
                 ORDER BY created_at ASC",
            )
            .context("Failed to prepare find_stale")?;
        let rows = stmt
            .query_map(params![cutoff.to_rfc3339()], TaskRow::from_row)
            .context("Failed to query stale tasks")?;
        collect_tasks(rows)
    }

    pub fn update_task(&self, id: i64, changes: &TaskChanges) -> Result<Option<Task>> {
        let Some(existing) = self.get_task(id)? else {
            return Ok(None);
        };
        let title = changes.title.as_deref().unwrap_or(&existing.title);
        let description = changes
            .description
            .as_deref()
            .unwrap_or(&existing.description);
        let completed = changes.completed.unwrap_or(existing.completed);
        self.conn
            .execute(
                "UPDATE tasks SET title = ?1, description = ?2, completed = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![title, description, completed, Utc::now().to_rfc3339(), id],
            )
            .context("Failed to update task")?;
        self.get_task(id)
    }

    pub fn delete_task(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        Ok(affected > 0)
    }
}

// ── Row mapping ───────────────────────────────────────────────────────

struct TaskRow {
    id: i64,
    user_id: i64,
    title: String,
    description: String,
    completed: bool,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            completed: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            description: self.description,
            completed: self.completed,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

struct UserRow {
    id: i64,
    email: String,
    role: String,
    created_at: String,
}

impl UserRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            role: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    fn into_user(self) -> Result<User> {
        Ok(User {
            id: self.id,
            email: self.email,
            role: self
                .role
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid role in users table")?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in store: {}", s))
}

fn collect_tasks<'a>(
    rows: impl Iterator<Item = rusqlite::Result<TaskRow>> + 'a,
) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    for row in rows {
        tasks.push(row.context("Failed to read task row")?.into_task()?);
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn db_with_user() -> (TaskDb, i64) {
        let db = TaskDb::new_in_memory().unwrap();
        let user = db.create_user("owner@example.com", Role::User).unwrap();
        (db, user.id)
    }

    #[test]
    fn create_and_get_task() {
        let (db, uid) = db_with_user();
        let task = db.create_task(uid, "Ship release", "cut the tag").unwrap();
        assert!(!task.completed);
        let fetched = db.get_task(task.id).unwrap().unwrap();
        assert_eq!(fetched.title, "Ship release");
        assert_eq!(fetched.user_id, uid);
    }

    #[test]
    fn update_task_applies_partial_changes() {
        let (db, uid) = db_with_user();
        let task = db.create_task(uid, "Draft", "v1").unwrap();
        let updated = db
            .update_task(
                task.id,
                &TaskChanges {
                    completed: Some(true),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert!(updated.completed);
        assert_eq!(updated.title, "Draft");
        assert!(db.update_task(9999, &TaskChanges::default()).unwrap().is_none());
    }

    #[test]
    fn delete_task_reports_whether_row_existed() {
        let (db, uid) = db_with_user();
        let task = db.create_task(uid, "t", "").unwrap();
        assert!(db.delete_task(task.id).unwrap());
        assert!(!db.delete_task(task.id).unwrap());
    }

    #[test]
    fn find_stale_filters_and_orders() {
        // threshold=24h: A@T-30h incomplete in, B@T-10h incomplete out,
        // C@T-48h completed out.
        let (db, uid) = db_with_user();
        let now = Utc::now();
        let a = db
            .create_task_at(uid, "A", "", now - Duration::hours(30))
            .unwrap();
        db.create_task_at(uid, "B", "", now - Duration::hours(10))
            .unwrap();
        let c = db
            .create_task_at(uid, "C", "", now - Duration::hours(48))
            .unwrap();
        db.update_task(
            c.id,
            &TaskChanges {
                completed: Some(true),
                ..Default::default()
            },
        )
        .unwrap();

        let stale = db.find_stale(now - Duration::hours(24)).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, a.id);
    }

    #[test]
    fn find_stale_returns_oldest_first() {
        let (db, uid) = db_with_user();
        let now = Utc::now();
        let newer = db
            .create_task_at(uid, "newer", "", now - Duration::hours(30))
            .unwrap();
        let oldest = db
            .create_task_at(uid, "oldest", "", now - Duration::hours(72))
            .unwrap();
        let middle = db
            .create_task_at(uid, "middle", "", now - Duration::hours(48))
            .unwrap();

        let stale = db.find_stale(now - Duration::hours(24)).unwrap();
        let ids: Vec<i64> = stale.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![oldest.id, middle.id, newer.id]);
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let db = TaskDb::new_in_memory().unwrap();
        db.create_user("same@example.com", Role::User).unwrap();
        assert!(db.create_user("same@example.com", Role::Admin).is_err());
    }

    #[test]
    fn task_requires_existing_user() {
        let db = TaskDb::new_in_memory().unwrap();
        assert!(db.create_task(123, "orphan", "").is_err());
    }
}
