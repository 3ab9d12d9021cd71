//! Task queue queries.
//!
//! Every state transition is a single conditional statement so that a
//! concurrent writer can never observe a half-applied update, and rows in
//! `done`/`failed` are never touched again.

use super::db::BridgeStore;
use super::models::{TaskRecord, TaskStatus};
use crate::common::error::StoreResult;

/// Outcome of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub status: TaskStatus,
    pub attempts: i64,
}

impl BridgeStore {
    /// Controller side: queue a task.
    #[cfg(test)]
    pub async fn enqueue_task(
        &self,
        task_type: &str,
        payload: Option<&serde_json::Value>,
        now: i64,
    ) -> StoreResult<i64> {
        let payload = payload.map(|p| p.to_string());
        let result = sqlx::query(
            "INSERT INTO steam_tasks (type, payload, status, attempts, created_at, updated_at)
             VALUES (?, ?, 'pending', 0, ?, ?)",
        )
        .bind(task_type)
        .bind(payload)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Up to `limit` pending tasks, oldest first.
    pub async fn pending_tasks(&self, limit: i64) -> StoreResult<Vec<TaskRecord>> {
        let rows = sqlx::query_as::<_, TaskRecord>(
            "SELECT * FROM steam_tasks WHERE status = 'pending' ORDER BY created_at ASC, id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// `pending → processing`. Returns `false` if another execution won.
    pub async fn claim_task(&self, id: i64, now: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE steam_tasks SET status = 'processing', started_at = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// `processing → pending` without consuming an attempt.
    pub async fn release_task(&self, id: i64, now: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE steam_tasks SET status = 'pending', started_at = NULL, updated_at = ?
             WHERE id = ? AND status = 'processing'",
        )
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// `processing → done` with the result JSON.
    pub async fn complete_task(&self, id: i64, result_json: &str, now: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE steam_tasks SET status = 'done', result = ?, error = NULL, updated_at = ?, finished_at = ?
             WHERE id = ? AND status = 'processing'",
        )
        .bind(result_json)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count a failed attempt: back to `pending` while attempts remain,
    /// otherwise `failed`. Returns `None` if the task was not processing.
    pub async fn fail_task_attempt(
        &self,
        id: i64,
        error: &str,
        max_attempts: i64,
        now: i64,
    ) -> StoreResult<Option<AttemptOutcome>> {
        let row: Option<(String, i64)> = sqlx::query_as(
            "UPDATE steam_tasks SET
                attempts = attempts + 1,
                status = CASE WHEN attempts + 1 >= ? THEN 'failed' ELSE 'pending' END,
                finished_at = CASE WHEN attempts + 1 >= ? THEN ? ELSE NULL END,
                started_at = NULL,
                error = ?,
                updated_at = ?
             WHERE id = ? AND status = 'processing'
             RETURNING status, attempts",
        )
        .bind(max_attempts)
        .bind(max_attempts)
        .bind(now)
        .bind(error)
        .bind(now)
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|(status, attempts)| AttemptOutcome {
            status: if status == TaskStatus::Failed.as_str() {
                TaskStatus::Failed
            } else {
                TaskStatus::Pending
            },
            attempts,
        }))
    }

    /// Fail a task without retry (unknown type). Still counts the attempt.
    pub async fn fail_task_permanently(&self, id: i64, error: &str, now: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE steam_tasks SET status = 'failed', attempts = attempts + 1, error = ?, updated_at = ?, finished_at = ?
             WHERE id = ? AND status = 'processing'",
        )
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_tasks_with_status(&self, status: TaskStatus) -> StoreResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM steam_tasks WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(self.pool())
            .await?;

        Ok(row.0)
    }

    #[cfg(test)]
    pub async fn get_task(&self, id: i64) -> StoreResult<Option<TaskRecord>> {
        let row = sqlx::query_as::<_, TaskRecord>("SELECT * FROM steam_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(row)
    }
}
