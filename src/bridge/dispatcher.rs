//! Routes inbound network events to the components that own them.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bridge::channels::DispatchChannels;
use crate::common::messages::SteamEvent;
use crate::common::types::FriendRelationship;
use crate::friends::FriendRequestDrainer;
use crate::presence::PresenceSynchronizer;

pub struct EventDispatcher {
    presence: Arc<PresenceSynchronizer>,
    friends: Arc<FriendRequestDrainer>,
}

impl EventDispatcher {
    pub fn new(presence: Arc<PresenceSynchronizer>, friends: Arc<FriendRequestDrainer>) -> Self {
        Self { presence, friends }
    }

    /// Handle one event. Store errors are logged; the event is dropped.
    pub async fn dispatch(&self, event: SteamEvent) {
        match event {
            SteamEvent::PresenceUpdate(update) => {
                if let Err(e) = self.presence.handle_update(&update).await {
                    warn!(steam_id = update.steam_id.as_u64(), error = %e, "Failed to store presence");
                }
            }
            SteamEvent::RelationshipChanged {
                steam_id,
                relationship,
            } => {
                debug!(steam_id = steam_id.as_u64(), ?relationship, "Relationship changed");
                if relationship == FriendRelationship::None && self.presence.unwatch(steam_id) {
                    info!(steam_id = steam_id.as_u64(), "Friend removed, no longer watched");
                }
                if let Err(e) = self.friends.handle_relationship(steam_id, relationship).await {
                    warn!(steam_id = steam_id.as_u64(), error = %e, "Failed to handle relationship change");
                }
            }
        }
    }

    /// Consume events until shutdown or until the session side goes away.
    pub async fn run(self, mut channels: DispatchChannels) {
        loop {
            tokio::select! {
                event = channels.event_rx.recv() => {
                    match event {
                        Some(event) => self.dispatch(event).await,
                        None => break,
                    }
                }
                changed = channels.shutdown_rx.changed() => {
                    if changed.is_err() || *channels.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Event dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::channels::ChannelBundle;
    use crate::common::messages::PresenceUpdate;
    use crate::common::types::SteamId;
    use crate::friends::DrainerSettings;
    use crate::protocol::cm::keyvalues::KvValue;
    use crate::session::SessionContext;
    use crate::store::BridgeStore;
    use std::time::Duration;

    async fn dispatcher() -> (EventDispatcher, Arc<PresenceSynchronizer>, BridgeStore) {
        let store = BridgeStore::open_in_memory().await.unwrap();
        let (ctx, _commands) = SessionContext::new(1422450);
        let presence = Arc::new(PresenceSynchronizer::new(store.clone(), ctx.clone(), 25));
        let friends = Arc::new(FriendRequestDrainer::new(
            store.clone(),
            ctx,
            DrainerSettings {
                batch_size: 5,
                retry_after_secs: 900,
                max_attempts: 5,
                request_timeout: Duration::from_secs(1),
            },
        ));
        (EventDispatcher::new(presence.clone(), friends), presence, store)
    }

    #[tokio::test]
    async fn test_presence_event_is_stored() {
        let (dispatcher, _presence, store) = dispatcher().await;
        dispatcher
            .dispatch(SteamEvent::PresenceUpdate(PresenceUpdate {
                steam_id: SteamId(42),
                app_id: 1422450,
                attributes: vec![("status".to_string(), KvValue::String("Menu".to_string()))],
            }))
            .await;

        let row = store.get_presence(SteamId(42)).await.unwrap().unwrap();
        assert_eq!(row.status.as_deref(), Some("Menu"));
    }

    #[tokio::test]
    async fn test_removed_friend_leaves_watch_set() {
        let (dispatcher, presence, store) = dispatcher().await;
        store.add_manual_watch(SteamId(9), None, 1).await.unwrap();
        presence.refresh_watch_set().await.unwrap();

        dispatcher
            .dispatch(SteamEvent::RelationshipChanged {
                steam_id: SteamId(9),
                relationship: FriendRelationship::None,
            })
            .await;
        assert!(!presence.is_watched(SteamId(9)));
    }

    #[tokio::test]
    async fn test_friend_event_marks_request_sent() {
        let (dispatcher, _presence, store) = dispatcher().await;
        store.enqueue_friend_request(SteamId(5), 1).await.unwrap();

        dispatcher
            .dispatch(SteamEvent::RelationshipChanged {
                steam_id: SteamId(5),
                relationship: FriendRelationship::Friend,
            })
            .await;
        assert_eq!(store.get_friend_request(SteamId(5)).await.unwrap().unwrap().status, "sent");
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (dispatcher, _presence, store) = dispatcher().await;
        let channels = ChannelBundle::new();
        let event_tx = channels.session.event_tx.clone();
        let handle = tokio::spawn(dispatcher.run(channels.dispatch));

        event_tx
            .send(SteamEvent::PresenceUpdate(PresenceUpdate {
                steam_id: SteamId(1),
                app_id: 1422450,
                attributes: Vec::new(),
            }))
            .unwrap();
        // Let the event through before shutting down
        while store.count_presence().await.unwrap() == 0 {
            tokio::task::yield_now().await;
        }

        channels.control.shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
