//! Invite pool queries.

use super::db::BridgeStore;
#[cfg(test)]
use super::models::InviteToken;
use crate::common::error::StoreResult;

/// A token freshly minted by the network.
pub struct NewInvite<'a> {
    pub token: &'a str,
    pub invite_link: &'a str,
    pub invite_limit: Option<i64>,
    pub invite_duration: Option<i64>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

impl BridgeStore {
    /// Mark available tokens past their expiry as `expired`.
    pub async fn expire_invites(&self, now: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE steam_invites SET status = 'expired'
             WHERE status = 'available' AND expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Number of available tokens that have not expired yet.
    pub async fn count_available_invites(&self, now: i64) -> StoreResult<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM steam_invites
             WHERE status = 'available' AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(row.0)
    }

    /// Insert or refresh a token. A token the controller already reserved
    /// or shared keeps its status.
    pub async fn upsert_invite(&self, invite: &NewInvite<'_>, now: i64) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO steam_invites
                (token, invite_link, invite_limit, invite_duration, created_at, expires_at, status, last_seen)
             VALUES (?, ?, ?, ?, ?, ?, 'available', ?)
             ON CONFLICT(token) DO UPDATE SET
                invite_link = excluded.invite_link,
                invite_limit = excluded.invite_limit,
                invite_duration = excluded.invite_duration,
                expires_at = excluded.expires_at,
                last_seen = excluded.last_seen,
                status = CASE
                    WHEN steam_invites.status IN ('reserved', 'shared') THEN steam_invites.status
                    ELSE excluded.status
                END",
        )
        .bind(invite.token)
        .bind(invite.invite_link)
        .bind(invite.invite_limit)
        .bind(invite.invite_duration)
        .bind(invite.created_at)
        .bind(invite.expires_at)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Controller side: hand an available token to a user.
    #[cfg(test)]
    pub async fn reserve_invite(&self, token: &str, user_id: i64, now: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE steam_invites SET status = 'reserved', reserved_by = ?, reserved_at = ?
             WHERE token = ? AND status = 'available'",
        )
        .bind(user_id)
        .bind(now)
        .bind(token)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Controller side: the reserved token was given out.
    #[cfg(test)]
    pub async fn mark_invite_shared(&self, token: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE steam_invites SET status = 'shared' WHERE token = ? AND status = 'reserved'",
        )
        .bind(token)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[cfg(test)]
    pub async fn get_invite(&self, token: &str) -> StoreResult<Option<InviteToken>> {
        let row = sqlx::query_as::<_, InviteToken>("SELECT * FROM steam_invites WHERE token = ?")
            .bind(token)
            .fetch_optional(self.pool())
            .await?;

        Ok(row)
    }
}
