//! Watch source queries (`steam_links`, `steam_watch_manual`).

use tracing::warn;

use super::db::BridgeStore;
use crate::common::error::StoreResult;
use crate::common::types::SteamId;

impl BridgeStore {
    /// Union of linked and manually watched accounts.
    ///
    /// Rows whose `steam_id` is not a 64-bit decimal are skipped.
    pub async fn watch_list(&self) -> StoreResult<Vec<SteamId>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT steam_id FROM steam_links UNION SELECT steam_id FROM steam_watch_manual",
        )
        .fetch_all(self.pool())
        .await?;

        let mut ids = Vec::with_capacity(rows.len());
        for (raw,) in rows {
            match raw.parse::<SteamId>() {
                Ok(id) => ids.push(id),
                Err(_) => warn!(steam_id = %raw, "Skipping malformed steam id in watch sources"),
            }
        }
        Ok(ids)
    }

    /// Link an account to a controller user.
    #[cfg(test)]
    pub async fn link_account(&self, user_id: i64, steam_id: SteamId, now: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO steam_links (user_id, steam_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(steam_id.to_string())
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[cfg(test)]
    pub async fn unlink_account(&self, user_id: i64, steam_id: SteamId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM steam_links WHERE user_id = ? AND steam_id = ?")
            .bind(user_id)
            .bind(steam_id.to_string())
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Add or re-note a manually watched account.
    #[cfg(test)]
    pub async fn add_manual_watch(&self, steam_id: SteamId, note: Option<&str>, now: i64) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO steam_watch_manual (steam_id, note, added_at) VALUES (?, ?, ?)
             ON CONFLICT(steam_id) DO UPDATE SET note = excluded.note",
        )
        .bind(steam_id.to_string())
        .bind(note)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    #[cfg(test)]
    pub async fn remove_manual_watch(&self, steam_id: SteamId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM steam_watch_manual WHERE steam_id = ?")
            .bind(steam_id.to_string())
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
