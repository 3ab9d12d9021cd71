//! Configuration type definitions.

use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub steam: SteamConfig,
    pub store: StoreConfig,
    pub presence: PresenceConfig,
    pub friends: FriendsConfig,
    pub invites: InvitesConfig,
    pub tasks: TasksConfig,
    /// `EnvFilter` directive.
    pub log: String,
}

/// Steam account and connection settings.
#[derive(Debug, Clone)]
pub struct SteamConfig {
    pub account_name: String,
    pub password: Option<String>,
    pub credential_path: PathBuf,
    pub shared_secret: Option<String>,
    pub guard_code: Option<String>,
    pub app_id: u32,
    /// `host:port` connection manager endpoints.
    pub cm_servers: Vec<String>,
    pub reconnect_delay_secs: u64,
    pub gc_hello_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub watch_refresh_secs: u64,
    pub poll_secs: u64,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct FriendsConfig {
    pub batch_size: i64,
    pub interval_secs: u64,
    pub retry_secs: i64,
    pub max_attempts: i64,
}

#[derive(Debug, Clone)]
pub struct InvitesConfig {
    /// Number of available tokens to keep in the pool.
    pub target: i64,
    /// Uses per token.
    pub limit: u32,
    pub duration_secs: u32,
    pub refresh_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TasksConfig {
    pub poll_secs: u64,
    pub batch_size: i64,
    pub max_attempts: i64,
    pub gc_timeout_secs: u64,
    pub not_ready_alert_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            steam: SteamConfig {
                account_name: String::new(),
                password: None,
                credential_path: PathBuf::from("steam_credentials.json"),
                shared_secret: None,
                guard_code: None,
                app_id: 1422450,
                cm_servers: Vec::new(),
                reconnect_delay_secs: 10,
                gc_hello_interval_secs: 5,
            },
            store: StoreConfig {
                database_path: PathBuf::from("steam_bridge.db"),
            },
            presence: PresenceConfig {
                watch_refresh_secs: 60,
                poll_secs: 30,
                batch_size: 25,
            },
            friends: FriendsConfig {
                batch_size: 5,
                interval_secs: 60,
                retry_secs: 900,
                max_attempts: 5,
            },
            invites: InvitesConfig {
                target: 5,
                limit: 1,
                duration_secs: 2_592_000,
                refresh_secs: 300,
            },
            tasks: TasksConfig {
                poll_secs: 2,
                batch_size: 10,
                max_attempts: 3,
                gc_timeout_secs: 15,
                not_ready_alert_secs: 3600,
            },
            log: "info".to_string(),
        }
    }
}

impl TasksConfig {
    pub fn gc_timeout(&self) -> Duration {
        Duration::from_secs(self.gc_timeout_secs)
    }
}
