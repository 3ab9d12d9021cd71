//! Canonical event types flowing from the session to the workers.

use crate::common::types::{FriendRelationship, SteamId};
use crate::protocol::cm::keyvalues::KvValue;

/// A rich-presence update received for one account.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceUpdate {
    pub steam_id: SteamId,
    /// App the presence belongs to (routing app id of the response).
    pub app_id: u32,
    /// Flattened attribute bag, in wire order.
    pub attributes: Vec<(String, KvValue)>,
}

/// Inbound network events, published by the session and consumed by the
/// event dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum SteamEvent {
    /// Rich presence arrived for a watched account.
    PresenceUpdate(PresenceUpdate),
    /// The relationship with another account changed.
    RelationshipChanged {
        steam_id: SteamId,
        relationship: FriendRelationship,
    },
}
