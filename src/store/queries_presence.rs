//! Rich presence snapshot queries.

use super::db::BridgeStore;
use super::models::PresenceSnapshot;
use crate::common::error::StoreResult;
#[cfg(test)]
use crate::common::types::SteamId;

impl BridgeStore {
    /// Write a snapshot, replacing every column of an existing row.
    pub async fn upsert_presence(&self, snapshot: &PresenceSnapshot) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO steam_rich_presence
                (steam_id, app_id, status, display, player_group, player_group_size, connect, raw_json, last_update)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(steam_id) DO UPDATE SET
                app_id = excluded.app_id,
                status = excluded.status,
                display = excluded.display,
                player_group = excluded.player_group,
                player_group_size = excluded.player_group_size,
                connect = excluded.connect,
                raw_json = excluded.raw_json,
                last_update = excluded.last_update",
        )
        .bind(&snapshot.steam_id)
        .bind(snapshot.app_id)
        .bind(&snapshot.status)
        .bind(&snapshot.display)
        .bind(&snapshot.player_group)
        .bind(snapshot.player_group_size)
        .bind(&snapshot.connect)
        .bind(&snapshot.raw_json)
        .bind(snapshot.last_update)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    #[cfg(test)]
    pub async fn get_presence(&self, steam_id: SteamId) -> StoreResult<Option<PresenceSnapshot>> {
        let row = sqlx::query_as::<_, PresenceSnapshot>(
            "SELECT * FROM steam_rich_presence WHERE steam_id = ?",
        )
        .bind(steam_id.to_string())
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    #[cfg(test)]
    pub async fn count_presence(&self) -> StoreResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM steam_rich_presence")
            .fetch_one(self.pool())
            .await?;

        Ok(row.0)
    }
}
