//! Rich presence attribute bag to snapshot row.

use std::collections::BTreeMap;

use crate::common::messages::PresenceUpdate;
use crate::store::PresenceSnapshot;

const STATUS: &str = "status";
const DISPLAY: &str = "steam_display";
const PLAYER_GROUP: &str = "steam_player_group";
const PLAYER_GROUP_SIZE: &str = "steam_player_group_size";
const CONNECT: &str = "connect";

/// Build the snapshot row for one presence update.
///
/// Values are rendered as strings. `raw_json` is a key-sorted object, so two
/// updates with the same attributes produce identical rows apart from
/// `last_update`. An empty bag (the account stopped playing) clears every
/// column.
pub fn snapshot_from_update(update: &PresenceUpdate, now: i64) -> PresenceSnapshot {
    let attributes: BTreeMap<String, String> = update
        .attributes
        .iter()
        .map(|(key, value)| (key.clone(), value.to_string()))
        .collect();

    let text = |key: &str| attributes.get(key).filter(|v| !v.is_empty()).cloned();

    PresenceSnapshot {
        steam_id: update.steam_id.to_string(),
        app_id: (update.app_id != 0).then_some(update.app_id as i64),
        status: text(STATUS),
        display: text(DISPLAY),
        player_group: text(PLAYER_GROUP),
        player_group_size: attributes
            .get(PLAYER_GROUP_SIZE)
            .and_then(|v| v.trim().parse().ok()),
        connect: text(CONNECT),
        // A string map always serializes
        raw_json: serde_json::to_string(&attributes).unwrap_or_else(|_| "{}".to_string()),
        last_update: now,
    }
}
