//! Configuration from environment variables.
//!
//! Every setting is read from `STEAM_BRIDGE_<NAME>`:
//! - `STEAM_BRIDGE_ACCOUNT_NAME` / `STEAM_BRIDGE_PASSWORD` - Steam account
//! - `STEAM_BRIDGE_CREDENTIAL_PATH` - login key file
//! - `STEAM_BRIDGE_SHARED_SECRET` / `STEAM_BRIDGE_GUARD_CODE` - Steam Guard
//! - `STEAM_BRIDGE_CM_SERVERS` - comma-separated `host:port` list
//! - `STEAM_BRIDGE_DATABASE_PATH` - shared store
//!
//! plus the interval and batch knobs listed in [`load_with`].

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::common::error::ConfigError;
use crate::config::types::Config;
use crate::config::validate::validate_config;

/// Environment variable prefix for all settings.
const ENV_PREFIX: &str = "STEAM_BRIDGE";

/// Load and validate configuration from the process environment.
pub fn load_from_env() -> Result<Config, ConfigError> {
    load_with(|name| env::var(name).ok())
}

/// Load and validate configuration through `lookup` (full variable name in,
/// value out). Unparseable values and validation problems are reported
/// together.
pub fn load_with<F>(lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut reader = EnvReader {
        lookup,
        errors: Vec::new(),
    };
    let mut config = Config::default();

    // Steam account
    if let Some(name) = reader.string("ACCOUNT_NAME") {
        config.steam.account_name = name;
    }
    config.steam.password = reader.string("PASSWORD");
    if let Some(path) = reader.string("CREDENTIAL_PATH") {
        config.steam.credential_path = PathBuf::from(path);
    }
    config.steam.shared_secret = reader.string("SHARED_SECRET");
    config.steam.guard_code = reader.string("GUARD_CODE");
    reader.parse("APP_ID", &mut config.steam.app_id);
    if let Some(servers) = reader.string("CM_SERVERS") {
        config.steam.cm_servers = servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    reader.parse("RECONNECT_DELAY_SECS", &mut config.steam.reconnect_delay_secs);
    reader.parse("GC_HELLO_INTERVAL_SECS", &mut config.steam.gc_hello_interval_secs);

    // Store
    if let Some(path) = reader.string("DATABASE_PATH") {
        config.store.database_path = PathBuf::from(path);
    }

    // Presence
    reader.parse("WATCH_REFRESH_SECS", &mut config.presence.watch_refresh_secs);
    reader.parse("PRESENCE_POLL_SECS", &mut config.presence.poll_secs);
    reader.parse("PRESENCE_BATCH_SIZE", &mut config.presence.batch_size);

    // Friend requests
    reader.parse("FRIEND_BATCH_SIZE", &mut config.friends.batch_size);
    reader.parse("FRIEND_INTERVAL_SECS", &mut config.friends.interval_secs);
    reader.parse("FRIEND_RETRY_SECS", &mut config.friends.retry_secs);
    reader.parse("FRIEND_MAX_ATTEMPTS", &mut config.friends.max_attempts);

    // Invites
    reader.parse("INVITE_TARGET", &mut config.invites.target);
    reader.parse("INVITE_LIMIT", &mut config.invites.limit);
    reader.parse("INVITE_DURATION_SECS", &mut config.invites.duration_secs);
    reader.parse("INVITE_REFRESH_SECS", &mut config.invites.refresh_secs);

    // Tasks
    reader.parse("TASK_POLL_SECS", &mut config.tasks.poll_secs);
    reader.parse("TASK_BATCH_SIZE", &mut config.tasks.batch_size);
    reader.parse("TASK_MAX_ATTEMPTS", &mut config.tasks.max_attempts);
    reader.parse("GC_TIMEOUT_SECS", &mut config.tasks.gc_timeout_secs);
    reader.parse("NOT_READY_ALERT_SECS", &mut config.tasks.not_ready_alert_secs);

    if let Some(log) = reader.string("LOG") {
        config.log = log;
    }

    let mut errors = reader.errors;
    if let Err(ConfigError::ValidationError { message }) = validate_config(&config) {
        errors.push(message);
    }

    if errors.is_empty() {
        Ok(config)
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

struct EnvReader<F> {
    lookup: F,
    errors: Vec<String>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn var_name(name: &str) -> String {
        format!("{}_{}", ENV_PREFIX, name)
    }

    /// Non-empty trimmed value.
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(&Self::var_name(name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&mut self, name: &str, target: &mut T) {
        if let Some(raw) = self.string(name) {
            match raw.parse() {
                Ok(value) => *target = value,
                Err(_) => self
                    .errors
                    .push(format!("{} has an invalid value '{}'", Self::var_name(name), raw)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(ENV_PREFIX, "STEAM_BRIDGE");
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_with(lookup(&[
            ("STEAM_BRIDGE_ACCOUNT_NAME", "bridgebot"),
            ("STEAM_BRIDGE_CM_SERVERS", "cm1.example:27017, cm2.example:27018,"),
        ]))
        .unwrap();

        assert_eq!(config.steam.account_name, "bridgebot");
        assert_eq!(config.steam.cm_servers, vec!["cm1.example:27017", "cm2.example:27018"]);
        assert_eq!(config.steam.app_id, 1422450);
        assert_eq!(config.steam.password, None);
        assert_eq!(config.presence.batch_size, 25);
        assert_eq!(config.friends.retry_secs, 900);
        assert_eq!(config.invites.duration_secs, 2_592_000);
        assert_eq!(config.tasks.max_attempts, 3);
        assert_eq!(config.log, "info");
    }

    #[test]
    fn test_overrides() {
        let config = load_with(lookup(&[
            ("STEAM_BRIDGE_ACCOUNT_NAME", "bridgebot"),
            ("STEAM_BRIDGE_PASSWORD", "hunter2"),
            ("STEAM_BRIDGE_CM_SERVERS", "cm:27017"),
            ("STEAM_BRIDGE_TASK_MAX_ATTEMPTS", "5"),
            ("STEAM_BRIDGE_INVITE_TARGET", "0"),
            ("STEAM_BRIDGE_GUARD_CODE", "  "),
        ]))
        .unwrap();

        assert_eq!(config.steam.password.as_deref(), Some("hunter2"));
        assert_eq!(config.tasks.max_attempts, 5);
        assert_eq!(config.invites.target, 0);
        assert_eq!(config.steam.guard_code, None);
    }

    #[test]
    fn test_all_errors_reported_together() {
        let err = load_with(lookup(&[
            ("STEAM_BRIDGE_TASK_POLL_SECS", "soon"),
            ("STEAM_BRIDGE_APP_ID", "-1"),
        ]))
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("STEAM_BRIDGE_TASK_POLL_SECS"));
        assert!(message.contains("STEAM_BRIDGE_APP_ID"));
        assert!(message.contains("account_name is required"));
        assert!(message.contains("cm_servers"));
    }
}
