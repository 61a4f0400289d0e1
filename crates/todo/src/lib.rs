//! Scheduled task records, backed by a single-table SQLite database.
//!
//! Grounded on the teacher's `SqliteJobStore`: a `tokio::sync::Mutex`around
//! a synchronous `rusqlite::Connection`, schema created up front, WAL mode
//! for concurrent readers.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum TodoError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
}

impl TaskStatus {
    fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
        }
    }

    fn parse(raw: &str) -> Self {
        if raw == "completed" {
            TaskStatus::Completed
        } else {
            TaskStatus::Pending
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub description: String,
    pub priority: i64,
    pub due_timestamp: Option<DateTime<Utc>>,
    pub created_timestamp: DateTime<Utc>,
    pub source_agent: String,
    pub status: TaskStatus,
}

/// `todo_list {filter}` selectors.
#[derive(Debug, Clone, Copy)]
pub enum ListFilter {
    /// Overdue (or due now) and not completed.
    Due,
    /// Any non-completed task with a due timestamp, nearest first.
    Upcoming,
    All,
}

pub struct TodoStore {
    conn: Mutex<Connection>,
}

impl TodoStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TodoError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, TodoError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), TodoError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                task_id           TEXT PRIMARY KEY,
                description       TEXT NOT NULL,
                priority          INTEGER NOT NULL DEFAULT 0,
                due_timestamp     TEXT,
                created_timestamp TEXT NOT NULL,
                source_agent      TEXT NOT NULL,
                status            TEXT NOT NULL DEFAULT 'pending'
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(due_timestamp);",
        )?;
        Ok(())
    }

    pub async fn add(
        &self,
        task_id: impl Into<String>,
        description: impl Into<String>,
        priority: i64,
        due_timestamp: Option<DateTime<Utc>>,
        source_agent: impl Into<String>,
    ) -> Result<Task, TodoError> {
        let task = Task {
            task_id: task_id.into(),
            description: description.into(),
            priority,
            due_timestamp,
            created_timestamp: Utc::now(),
            source_agent: source_agent.into(),
            status: TaskStatus::Pending,
        };
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tasks (task_id, description, priority, due_timestamp, created_timestamp, source_agent, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task.task_id,
                task.description,
                task.priority,
                task.due_timestamp.map(|t| t.to_rfc3339()),
                task.created_timestamp.to_rfc3339(),
                task.source_agent,
                task.status.as_str(),
            ],
        )?;
        Ok(task)
    }

    pub async fn complete(&self, task_id: &str) -> Result<(), TodoError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE tasks SET status = 'completed' WHERE task_id = ?1",
            params![task_id],
        )?;
        if changed == 0 {
            return Err(TodoError::NotFound(task_id.to_string()));
        }
        Ok(())
    }

    /// Reschedule a pending task to a new due time (`snooze_task`).
    pub async fn snooze(&self, task_id: &str, new_due: DateTime<Utc>) -> Result<(), TodoError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE tasks SET due_timestamp = ?1 WHERE task_id = ?2",
            params![new_due.to_rfc3339(), task_id],
        )?;
        if changed == 0 {
            return Err(TodoError::NotFound(task_id.to_string()));
        }
        Ok(())
    }

    pub async fn list(&self, filter: ListFilter) -> Result<Vec<Task>, TodoError> {
        let conn = self.conn.lock().await;
        let (query, now) = match filter {
            ListFilter::Due => (
                "SELECT * FROM tasks WHERE status != 'completed' AND due_timestamp IS NOT NULL \
                 AND due_timestamp <= ?1 ORDER BY due_timestamp ASC",
                Some(Utc::now()),
            ),
            ListFilter::Upcoming => (
                "SELECT * FROM tasks WHERE status != 'completed' AND due_timestamp IS NOT NULL \
                 ORDER BY due_timestamp ASC",
                None,
            ),
            ListFilter::All => ("SELECT * FROM tasks ORDER BY created_timestamp ASC", None),
        };

        let mut stmt = conn.prepare(query)?;
        let rows = if let Some(now) = now {
            stmt.query_map(params![now.to_rfc3339()], Self::row_to_task)?
                .collect::<Result<Vec<_>, _>>()?
        } else {
            stmt.query_map([], Self::row_to_task)?
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(rows)
    }

    /// Seconds until the next due, non-completed task — used by the
    /// scheduler to size its alarm timer. Returns `None` when no task has a
    /// due timestamp.
    pub async fn seconds_until_next_due(&self) -> Result<Option<f64>, TodoError> {
        let conn = self.conn.lock().await;
        let next: Option<String> = conn
            .query_row(
                "SELECT due_timestamp FROM tasks WHERE status != 'completed' \
                 AND due_timestamp IS NOT NULL ORDER BY due_timestamp ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = next else { return Ok(None) };
        let due = DateTime::parse_from_rfc3339(&raw)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let delta = (due - Utc::now()).num_milliseconds() as f64 / 1000.0;
        Ok(Some(delta))
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
        let due_raw: Option<String> = row.get("due_timestamp")?;
        let created_raw: String = row.get("created_timestamp")?;
        let status_raw: String = row.get("status")?;
        Ok(Task {
            task_id: row.get("task_id")?,
            description: row.get("description")?,
            priority: row.get("priority")?,
            due_timestamp: due_raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
            created_timestamp: DateTime::parse_from_rfc3339(&created_raw)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            source_agent: row.get("source_agent")?,
            status: TaskStatus::parse(&status_raw),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn add_then_list_all_round_trips() -> anyhow::Result<()> {
        let store = TodoStore::open_in_memory()?;
        store.add("t1", "water plants", 1, None, "a1").await?;
        let all = store.list(ListFilter::All).await?;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].description, "water plants");
        assert_eq!(all[0].status, TaskStatus::Pending);
        Ok(())
    }

    #[tokio::test]
    async fn due_filter_excludes_future_tasks() -> anyhow::Result<()> {
        let store = TodoStore::open_in_memory()?;
        store.add("past", "overdue", 1, Some(Utc::now() - Duration::hours(1)), "a1").await?;
        store.add("future", "not yet", 1, Some(Utc::now() + Duration::hours(1)), "a1").await?;

        let due = store.list(ListFilter::Due).await?;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].task_id, "past");
        Ok(())
    }

    #[tokio::test]
    async fn complete_marks_status_and_excludes_from_upcoming() -> anyhow::Result<()> {
        let store = TodoStore::open_in_memory()?;
        store.add("t1", "task", 1, Some(Utc::now()), "a1").await?;
        store.complete("t1").await?;

        let upcoming = store.list(ListFilter::Upcoming).await?;
        assert!(upcoming.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn complete_missing_task_errors() -> anyhow::Result<()> {
        let store = TodoStore::open_in_memory()?;
        let result = store.complete("ghost").await;
        assert!(matches!(result, Err(TodoError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn snooze_updates_due_timestamp() -> anyhow::Result<()> {
        let store = TodoStore::open_in_memory()?;
        let original_due = Utc::now() + Duration::minutes(5);
        store.add("t1", "task", 1, Some(original_due), "a1").await?;

        let new_due = Utc::now() + Duration::hours(2);
        store.snooze("t1", new_due).await?;

        let all = store.list(ListFilter::All).await?;
        let delta = (all[0].due_timestamp.unwrap() - new_due).num_seconds().abs();
        assert!(delta < 2);
        Ok(())
    }

    #[tokio::test]
    async fn seconds_until_next_due_picks_nearest() -> anyhow::Result<()> {
        let store = TodoStore::open_in_memory()?;
        store.add("far", "later", 1, Some(Utc::now() + Duration::hours(5)), "a1").await?;
        store.add("near", "soon", 1, Some(Utc::now() + Duration::seconds(30)), "a1").await?;

        let secs = store.seconds_until_next_due().await?.unwrap();
        assert!(secs > 0.0 && secs < 60.0);
        Ok(())
    }
}
