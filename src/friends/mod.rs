//! Friend request queue.

pub mod drainer;

pub use drainer::{DrainerSettings, FriendRequestDrainer};
