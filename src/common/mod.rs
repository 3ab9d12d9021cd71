//! Common utilities and types shared across the application.

pub mod error;
pub mod messages;
pub mod reconnect;
pub mod types;

/// Current time as Unix seconds.
pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
