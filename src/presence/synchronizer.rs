//! Keeps the rich presence mirror of watched accounts fresh.
//!
//! Two periodic jobs drive it: a slow watch refresh that re-reads the watch
//! sources and a faster poll that asks Steam for presence of the whole set.
//! Responses arrive as events and are persisted one row per account.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::common::error::StoreResult;
use crate::common::messages::PresenceUpdate;
use crate::common::types::SteamId;
use crate::common::unix_timestamp;
use crate::presence::normalize::snapshot_from_update;
use crate::session::SessionContext;
use crate::store::BridgeStore;

/// Changes applied by one watch refresh.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchDelta {
    pub added: Vec<SteamId>,
    pub removed: Vec<SteamId>,
}

pub struct PresenceSynchronizer {
    store: BridgeStore,
    ctx: Arc<SessionContext>,
    batch_size: usize,
    watched: Mutex<BTreeSet<SteamId>>,
}

impl PresenceSynchronizer {
    pub fn new(store: BridgeStore, ctx: Arc<SessionContext>, batch_size: usize) -> Self {
        Self {
            store,
            ctx,
            batch_size: batch_size.max(1),
            watched: Mutex::new(BTreeSet::new()),
        }
    }

    /// Re-read the watch sources. New accounts are requested right away;
    /// vanished ones leave the set but keep their snapshot.
    pub async fn refresh_watch_set(&self) -> StoreResult<WatchDelta> {
        let current: BTreeSet<SteamId> = self.store.watch_list().await?.into_iter().collect();

        let delta = {
            let mut watched = self.watched();
            let delta = WatchDelta {
                added: current.difference(&watched).copied().collect(),
                removed: watched.difference(&current).copied().collect(),
            };
            *watched = current;
            delta
        };

        if !delta.added.is_empty() || !delta.removed.is_empty() {
            info!(
                added = delta.added.len(),
                removed = delta.removed.len(),
                watched = self.watched_count(),
                "Watch set updated"
            );
        }
        self.request(&delta.added);
        Ok(delta)
    }

    /// Request presence for every watched account. Returns the number of
    /// request batches sent.
    pub fn poll(&self) -> usize {
        let ids: Vec<SteamId> = self.watched().iter().copied().collect();
        self.request(&ids)
    }

    fn request(&self, ids: &[SteamId]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        if !self.ctx.is_ready() {
            debug!(count = ids.len(), "Session not ready, presence request skipped");
            return 0;
        }
        ids.chunks(self.batch_size)
            .filter(|chunk| self.ctx.request_rich_presence(chunk.to_vec()))
            .count()
    }

    /// Persist one presence update.
    pub async fn handle_update(&self, update: &PresenceUpdate) -> StoreResult<()> {
        let snapshot = snapshot_from_update(update, unix_timestamp());
        debug!(
            steam_id = update.steam_id.as_u64(),
            status = ?snapshot.status,
            "Presence updated"
        );
        self.store.upsert_presence(&snapshot).await
    }

    /// Stop watching an account until the next refresh brings it back.
    pub fn unwatch(&self, steam_id: SteamId) -> bool {
        self.watched().remove(&steam_id)
    }

    #[cfg(test)]
    pub fn is_watched(&self, steam_id: SteamId) -> bool {
        self.watched().contains(&steam_id)
    }

    pub fn watched_count(&self) -> usize {
        self.watched().len()
    }

    fn watched(&self) -> MutexGuard<'_, BTreeSet<SteamId>> {
        self.watched.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
