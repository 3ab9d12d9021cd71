//! Quick-invite token pool.

pub mod pool;

pub use pool::{InvitePoolManager, InviteSettings};
