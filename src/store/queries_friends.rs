//! Friend request queue queries.

use super::db::BridgeStore;
use super::models::FriendRequestJob;
use crate::common::error::StoreResult;
use crate::common::types::SteamId;

/// Selection limits for one drain cycle.
#[derive(Debug, Clone, Copy)]
pub struct FriendDrainWindow {
    pub now: i64,
    pub retry_after_secs: i64,
    pub max_attempts: i64,
    pub limit: i64,
}

impl BridgeStore {
    /// Queue an outbound friend request. Existing jobs are left untouched.
    #[cfg(test)]
    pub async fn enqueue_friend_request(&self, steam_id: SteamId, now: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO steam_friend_requests (steam_id, status, requested_at, attempts)
             VALUES (?, 'pending', ?, 0)
             ON CONFLICT(steam_id) DO NOTHING",
        )
        .bind(steam_id.to_string())
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Pending jobs that are due for an attempt, oldest request first.
    pub async fn due_friend_requests(&self, window: FriendDrainWindow) -> StoreResult<Vec<FriendRequestJob>> {
        let rows = sqlx::query_as::<_, FriendRequestJob>(
            "SELECT * FROM steam_friend_requests
             WHERE status = 'pending'
               AND (last_attempt IS NULL OR last_attempt <= ?)
               AND attempts < ?
             ORDER BY requested_at ASC, steam_id ASC
             LIMIT ?",
        )
        .bind(window.now - window.retry_after_secs)
        .bind(window.max_attempts)
        .bind(window.limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Mark a job `sent`. Returns `false` if there is no job or it was
    /// already sent.
    pub async fn mark_friend_request_sent(&self, steam_id: SteamId, now: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE steam_friend_requests
             SET status = 'sent', attempts = MAX(attempts, 1), error = NULL, last_attempt = ?
             WHERE steam_id = ? AND status <> 'sent'",
        )
        .bind(now)
        .bind(steam_id.to_string())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count a failed attempt. The job stays `pending`.
    pub async fn record_friend_request_failure(
        &self,
        steam_id: SteamId,
        error: &str,
        now: i64,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE steam_friend_requests
             SET attempts = attempts + 1, error = ?, last_attempt = ?
             WHERE steam_id = ? AND status = 'pending'",
        )
        .bind(error)
        .bind(now)
        .bind(steam_id.to_string())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move pending jobs that used up their attempts to `failed`. The last
    /// recorded error is kept.
    pub async fn fail_exhausted_friend_requests(&self, max_attempts: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE steam_friend_requests
             SET status = 'failed', error = COALESCE(error, 'max attempts reached')
             WHERE status = 'pending' AND attempts >= ?",
        )
        .bind(max_attempts)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    #[cfg(test)]
    pub async fn get_friend_request(&self, steam_id: SteamId) -> StoreResult<Option<FriendRequestJob>> {
        let row = sqlx::query_as::<_, FriendRequestJob>(
            "SELECT * FROM steam_friend_requests WHERE steam_id = ?",
        )
        .bind(steam_id.to_string())
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }
}
