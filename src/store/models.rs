//! Row types for the shared store.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Last known rich presence of one account. One row per account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PresenceSnapshot {
    pub steam_id: String,
    pub app_id: Option<i64>,
    pub status: Option<String>,
    pub display: Option<String>,
    pub player_group: Option<String>,
    pub player_group_size: Option<i64>,
    pub connect: Option<String>,
    pub raw_json: String,
    pub last_update: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FriendRequestJob {
    pub steam_id: String,
    pub status: String,
    pub requested_at: i64,
    pub last_attempt: Option<i64>,
    pub attempts: i64,
    pub error: Option<String>,
}

#[cfg(test)]
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InviteToken {
    pub token: String,
    pub invite_link: String,
    pub invite_limit: Option<i64>,
    pub invite_duration: Option<i64>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub status: String,
    pub reserved_by: Option<i64>,
    pub reserved_at: Option<i64>,
    pub last_seen: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskRecord {
    pub id: i64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: Option<String>,
    pub status: String,
    pub attempts: i64,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}
