//! Shared SQLite store between the external controller and the bridge.
//!
//! One query module per table. The controller writes rows, the bridge's
//! periodic jobs observe and update them.

mod db;
mod models;
mod queries_friends;
mod queries_invites;
mod queries_presence;
mod queries_tasks;
mod queries_watch;


pub use db::BridgeStore;
pub use models::*;
pub use queries_friends::FriendDrainWindow;
pub use queries_invites::NewInvite;
