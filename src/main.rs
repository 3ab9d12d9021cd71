//! Steam Bridge - Steam session, GC task queue and presence mirror
//!
//! A long-running bot that keeps a Steam session alive and executes work
//! an external controller leaves in a shared SQLite store: queued tasks,
//! friend requests, invite tokens and the rich presence watchlist.

mod bridge;
mod common;
mod config;
mod friends;
mod invites;
mod presence;
mod protocol;
mod session;
mod store;
mod tasks;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use bridge::channels::ControlChannels;
use bridge::{ChannelBundle, EventDispatcher, Scheduler};
use friends::{DrainerSettings, FriendRequestDrainer};
use invites::{InvitePoolManager, InviteSettings};
use presence::PresenceSynchronizer;
use session::{CredentialStore, SessionContext, SessionSettings, SessionSupervisor};
use store::BridgeStore;
use tasks::{ProcessorSettings, TaskProcessor};

/// Per-endpoint TCP connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a graceful logoff may take on shutdown.
const LOGOFF_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let loaded = config::load_from_env();

    // Initialize logging; RUST_LOG wins over STEAM_BRIDGE_LOG
    let directive = loaded
        .as_ref()
        .map(|c| c.log.clone())
        .unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Steam Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = loaded.map_err(|e| {
        error!("Failed to load configuration:\n{}", e);
        error!("Settings are read from STEAM_BRIDGE_* environment variables.");
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  Account: {}", config.steam.account_name);
    info!("  App id: {}", config.steam.app_id);
    info!("  CM servers: {}", config.steam.cm_servers.join(", "));
    info!("  Database: {}", config.store.database_path.display());

    // ============================================================
    // Shared store and credentials
    // ============================================================
    let store = BridgeStore::open(&config.store.database_path).await?;
    let credentials = CredentialStore::load(&config.steam.credential_path).await?;
    if credentials.login_key().is_none() && config.steam.password.is_none() {
        error!("No stored login key and no STEAM_BRIDGE_PASSWORD configured");
        std::process::exit(1);
    }

    // ============================================================
    // Session
    // ============================================================
    let ChannelBundle {
        session: session_channels,
        dispatch: dispatch_channels,
        control: ControlChannels { shutdown_tx },
    } = ChannelBundle::new();

    let (ctx, command_rx) = SessionContext::new(config.steam.app_id);
    let supervisor = SessionSupervisor::new(
        SessionSettings {
            account_name: config.steam.account_name.clone(),
            password: config.steam.password.clone(),
            cm_servers: config.steam.cm_servers.clone(),
            reconnect_delay: Duration::from_secs(config.steam.reconnect_delay_secs),
            gc_hello_interval: Duration::from_secs(config.steam.gc_hello_interval_secs),
            connect_timeout: CONNECT_TIMEOUT,
            shared_secret: config.steam.shared_secret.clone(),
            guard_code: config.steam.guard_code.clone(),
        },
        ctx.clone(),
        command_rx,
        session_channels.event_tx,
        credentials,
        session_channels.shutdown_rx,
    );

    // ============================================================
    // Workers
    // ============================================================
    let presence = Arc::new(PresenceSynchronizer::new(
        store.clone(),
        ctx.clone(),
        config.presence.batch_size,
    ));
    let friends = Arc::new(FriendRequestDrainer::new(
        store.clone(),
        ctx.clone(),
        DrainerSettings {
            batch_size: config.friends.batch_size,
            retry_after_secs: config.friends.retry_secs,
            max_attempts: config.friends.max_attempts,
            request_timeout: config.tasks.gc_timeout(),
        },
    ));
    let invites = Arc::new(InvitePoolManager::new(
        store.clone(),
        ctx.clone(),
        InviteSettings {
            target: config.invites.target,
            limit: config.invites.limit,
            duration_secs: config.invites.duration_secs,
            request_timeout: config.tasks.gc_timeout(),
        },
    ));
    let processor = Arc::new(TaskProcessor::new(
        store.clone(),
        ctx.clone(),
        ProcessorSettings {
            batch_size: config.tasks.batch_size,
            max_attempts: config.tasks.max_attempts,
            gc_timeout: config.tasks.gc_timeout(),
            not_ready_alert_after: Duration::from_secs(config.tasks.not_ready_alert_secs),
        },
    ));
    processor.report_stuck_tasks().await?;

    let dispatcher = EventDispatcher::new(presence.clone(), friends.clone());
    let dispatcher_task = tokio::spawn(dispatcher.run(dispatch_channels));

    // ============================================================
    // Periodic jobs
    // ============================================================
    let mut scheduler = Scheduler::new();
    {
        let presence = presence.clone();
        scheduler.add("watch-refresh", secs(config.presence.watch_refresh_secs), move || {
            let presence = presence.clone();
            async move {
                if let Err(e) = presence.refresh_watch_set().await {
                    warn!(error = %e, "Watch refresh failed");
                }
            }
        });
    }
    {
        let presence = presence.clone();
        scheduler.add("presence-poll", secs(config.presence.poll_secs), move || {
            let presence = presence.clone();
            async move {
                let batches = presence.poll();
                debug!(batches, watched = presence.watched_count(), "Presence poll");
            }
        });
    }
    {
        let friends = friends.clone();
        scheduler.add("friend-drain", secs(config.friends.interval_secs), move || {
            let friends = friends.clone();
            async move {
                if let Err(e) = friends.drain_once().await {
                    warn!(error = %e, "Friend drain failed");
                }
            }
        });
    }
    {
        let invites = invites.clone();
        scheduler.add("invite-refresh", secs(config.invites.refresh_secs), move || {
            let invites = invites.clone();
            async move {
                if let Err(e) = invites.refresh_once().await {
                    warn!(error = %e, "Invite refresh failed");
                }
            }
        });
    }
    {
        let processor = processor.clone();
        scheduler.add("task-poll", secs(config.tasks.poll_secs), move || {
            let processor = processor.clone();
            async move {
                if let Err(e) = processor.poll_once().await {
                    warn!(error = %e, "Task poll failed");
                }
            }
        });
    }
    scheduler.start();
    info!(jobs = ?scheduler.job_names(), "Periodic jobs started");

    // ============================================================
    // Run until shutdown or a fatal session error
    // ============================================================
    let mut session_task = tokio::spawn(supervisor.run());

    let shutdown = tokio::select! {
        biased;
        _ = shutdown_signal() => {
            info!("Shutdown signal received - logging off...");
            true
        }
        result = &mut session_task => {
            match result {
                Ok(Err(e)) => {
                    error!("Authentication failed: {}", e);
                    scheduler.shutdown().await;
                    std::process::exit(1);
                }
                Ok(Ok(())) => info!("Session supervisor exited"),
                Err(e) => error!("Session supervisor task panicked: {}", e),
            }
            false
        }
    };

    if let Err(e) = shutdown_tx.send(true) {
        debug!("Shutdown channel closed: {}", e);
    }
    if shutdown {
        match tokio::time::timeout(LOGOFF_TIMEOUT, session_task).await {
            Ok(Ok(Ok(()))) => info!("Logged off gracefully"),
            Ok(Ok(Err(e))) => warn!("Session ended with an error during shutdown: {}", e),
            Ok(Err(e)) => warn!("Session supervisor task panicked: {}", e),
            Err(_) => warn!("Logoff timed out"),
        }
    }

    scheduler.shutdown().await;
    if let Err(e) = dispatcher_task.await {
        warn!("Event dispatcher task panicked: {}", e);
    }
    store.pool().close().await;

    info!("Exiting...");
    Ok(())
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
