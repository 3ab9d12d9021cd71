//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    // Steam account
    if config.steam.account_name.is_empty() {
        errors.push("steam.account_name is required".to_string());
    }
    if config.steam.app_id == 0 {
        errors.push("steam.app_id must be non-zero".to_string());
    }
    if config.steam.cm_servers.is_empty() {
        errors.push("steam.cm_servers is required (comma-separated host:port)".to_string());
    }
    for (i, server) in config.steam.cm_servers.iter().enumerate() {
        let valid = server
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().map(|p| p > 0).unwrap_or(false))
            .unwrap_or(false);
        if !valid {
            errors.push(format!(
                "steam.cm_servers[{}] '{}' is not a valid host:port",
                i, server
            ));
        }
    }

    // Intervals feed tokio timers, which reject a zero period
    let intervals = [
        ("steam.reconnect_delay_secs", config.steam.reconnect_delay_secs),
        ("steam.gc_hello_interval_secs", config.steam.gc_hello_interval_secs),
        ("presence.watch_refresh_secs", config.presence.watch_refresh_secs),
        ("presence.poll_secs", config.presence.poll_secs),
        ("friends.interval_secs", config.friends.interval_secs),
        ("invites.refresh_secs", config.invites.refresh_secs),
        ("tasks.poll_secs", config.tasks.poll_secs),
        ("tasks.gc_timeout_secs", config.tasks.gc_timeout_secs),
        ("tasks.not_ready_alert_secs", config.tasks.not_ready_alert_secs),
    ];
    for (name, value) in intervals {
        if value == 0 {
            errors.push(format!("{} must be non-zero", name));
        }
    }

    // Batches and limits
    if config.presence.batch_size == 0 {
        errors.push("presence.batch_size must be non-zero".to_string());
    }
    if config.friends.batch_size < 1 {
        errors.push("friends.batch_size must be at least 1".to_string());
    }
    if config.friends.retry_secs < 0 {
        errors.push("friends.retry_secs must not be negative".to_string());
    }
    if config.friends.max_attempts < 1 {
        errors.push("friends.max_attempts must be at least 1".to_string());
    }
    if config.invites.target < 0 {
        errors.push("invites.target must not be negative".to_string());
    }
    if config.invites.limit == 0 {
        errors.push("invites.limit must be non-zero".to_string());
    }
    if config.invites.duration_secs == 0 {
        errors.push("invites.duration_secs must be non-zero".to_string());
    }
    if config.tasks.batch_size < 1 {
        errors.push("tasks.batch_size must be at least 1".to_string());
    }
    if config.tasks.max_attempts < 1 {
        errors.push("tasks.max_attempts must be at least 1".to_string());
    }

    if tracing_subscriber::EnvFilter::try_new(&config.log).is_err() {
        errors.push(format!("log '{}' is not a valid filter directive", config.log));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}
