//! Task repository — ordered queue operations over the `tasks` table.
//!
//! The `id` column (AUTOINCREMENT) is the canonical processing and merge
//! order: `next_pending` always returns the lowest pending id, and `list`
//! returns rows in ascending id. Nothing here ever reorders by content.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// The kind of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Image,
    PdfPage,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Image => "image",
            TaskKind::PdfPage => "pdf_page",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(TaskKind::Image),
            "pdf_page" => Some(TaskKind::PdfPage),
            _ => None,
        }
    }
}

/// Task lifecycle status. Only a full reset leaves `Completed`/`Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

/// A task row as stored in the queue.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: i64,
    pub kind: TaskKind,
    pub source_path: String,
    pub page_index: Option<u32>,
    pub page_count: Option<u32>,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub error_message: Option<String>,
    pub output_path: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let kind_raw: String = row.get("kind")?;
        let kind = TaskKind::parse(&kind_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown task kind '{kind_raw}'").into(),
            )
        })?;

        let status_raw: String = row.get("status")?;
        let status = TaskStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                format!("unknown task status '{status_raw}'").into(),
            )
        })?;

        Ok(Self {
            id: row.get("id")?,
            kind,
            source_path: row.get("source_path")?,
            page_index: row.get("page_index")?,
            page_count: row.get("page_count")?,
            status,
            attempt_count: row.get("attempt_count")?,
            error_message: row.get("error_message")?,
            output_path: row.get("output_path")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// A task yet to be inserted. Produced by the input decomposer.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub kind: TaskKind,
    pub source_path: PathBuf,
    pub page_index: Option<u32>,
    pub page_count: Option<u32>,
}

impl TaskSpec {
    pub fn image(source_path: &Path) -> Self {
        Self {
            kind: TaskKind::Image,
            source_path: source_path.to_path_buf(),
            page_index: None,
            page_count: None,
        }
    }

    pub fn pdf_page(source_path: &Path, page_index: u32, page_count: u32) -> Self {
        Self {
            kind: TaskKind::PdfPage,
            source_path: source_path.to_path_buf(),
            page_index: Some(page_index),
            page_count: Some(page_count),
        }
    }
}

/// Aggregate status counts derived from the task set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.failed
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Inserts the given specs in order, inside one transaction, and returns the
/// assigned ids. The single transaction keeps a PDF's page block contiguous
/// even if another enqueue call races on a separate connection.
pub fn enqueue(db: &Database, specs: &[TaskSpec]) -> Result<Vec<i64>, DatabaseError> {
    let created_at = now_rfc3339();
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            tx.execute(
                "INSERT INTO tasks (kind, source_path, page_index, page_count, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
                params![
                    spec.kind.as_str(),
                    spec.source_path.to_string_lossy(),
                    spec.page_index,
                    spec.page_count,
                    created_at,
                ],
            )?;
            ids.push(tx.last_insert_rowid());
        }
        tx.commit()?;
        Ok(ids)
    })
}

/// Returns the lowest-id pending task, if any. This is what makes processing
/// strictly FIFO by enqueue order.
pub fn next_pending(db: &Database) -> Result<Option<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE status = 'pending' ORDER BY id ASC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], TaskRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Marks a task running, stamps `started_at` and bumps `attempt_count`.
pub fn mark_running(db: &Database, id: i64) -> Result<(), DatabaseError> {
    let started_at = now_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE tasks SET status = 'running', started_at = ?2,
             attempt_count = attempt_count + 1 WHERE id = ?1",
            params![id, started_at],
        )?;
        Ok(())
    })
}

/// Marks a task completed and records the fragment path.
pub fn mark_completed(db: &Database, id: i64, output_path: &Path) -> Result<(), DatabaseError> {
    let completed_at = now_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE tasks SET status = 'completed', output_path = ?2,
             completed_at = ?3, error_message = NULL WHERE id = ?1",
            params![id, output_path.to_string_lossy(), completed_at],
        )?;
        Ok(())
    })
}

/// Marks a task failed and records the error message.
pub fn mark_failed(db: &Database, id: i64, error_message: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE tasks SET status = 'failed', error_message = ?2 WHERE id = ?1",
            params![id, error_message],
        )?;
        Ok(())
    })
}

/// Lists tasks in ascending id, optionally filtered by status.
pub fn list(db: &Database, status: Option<TaskStatus>) -> Result<Vec<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let rows = match status {
            Some(status) => {
                let mut stmt =
                    conn.prepare("SELECT * FROM tasks WHERE status = ?1 ORDER BY id ASC")?;
                let rows: Vec<TaskRow> = stmt
                    .query_map(params![status.as_str()], TaskRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare("SELECT * FROM tasks ORDER BY id ASC")?;
                let rows: Vec<TaskRow> = stmt
                    .query_map([], TaskRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    })
}

/// Returns counts per status.
pub fn status_counts(db: &Database) -> Result<StatusCounts, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let mut counts = StatusCounts::default();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count: u64 = row.get(1)?;
            match TaskStatus::parse(&status) {
                Some(TaskStatus::Pending) => counts.pending = count,
                Some(TaskStatus::Running) => counts.running = count,
                Some(TaskStatus::Completed) => counts.completed = count,
                Some(TaskStatus::Failed) => counts.failed = count,
                None => log::warn!("Ignoring unknown task status '{status}' in counts"),
            }
        }
        Ok(counts)
    })
}

/// Most recent task-level failure message, surfaced in job status.
pub fn last_error_message(db: &Database) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT error_message FROM tasks
             WHERE status = 'failed' AND error_message IS NOT NULL
             ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    })
}

/// `(started_at, completed_at)` pairs of completed tasks, for ETA estimation.
pub fn completed_timestamps(db: &Database) -> Result<Vec<(String, String)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT started_at, completed_at FROM tasks
             WHERE status = 'completed'
               AND started_at IS NOT NULL AND completed_at IS NOT NULL
             ORDER BY id ASC",
        )?;
        let pairs: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pairs)
    })
}

/// Deletes all task rows, returning how many were removed. Reset support.
pub fn delete_all(db: &Database) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute("DELETE FROM tasks", [])?;
        Ok(deleted)
    })
}
