//! Bridge channel management.
//!
//! Groups the channels wiring the session supervisor to the rest of the
//! process.

use tokio::sync::{mpsc, watch};

use crate::common::messages::SteamEvent;

/// Channels for the session supervisor.
pub struct SessionChannels {
    /// Sender for inbound network events (session publishes).
    pub event_tx: mpsc::UnboundedSender<SteamEvent>,
    /// Receiver for the shutdown signal.
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Channels for the event dispatcher.
pub struct DispatchChannels {
    /// Receiver for inbound network events.
    pub event_rx: mpsc::UnboundedReceiver<SteamEvent>,
    /// Receiver for the shutdown signal.
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Control channels for shutdown coordination.
pub struct ControlChannels {
    /// Sender to trigger shutdown.
    pub shutdown_tx: watch::Sender<bool>,
}

/// Bundle of all channels created at startup.
pub struct ChannelBundle {
    pub session: SessionChannels,
    pub dispatch: DispatchChannels,
    pub control: ControlChannels,
}

impl ChannelBundle {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            session: SessionChannels {
                event_tx,
                shutdown_rx: shutdown_rx.clone(),
            },
            dispatch: DispatchChannels {
                event_rx,
                shutdown_rx,
            },
            control: ControlChannels { shutdown_tx },
        }
    }
}

impl Default for ChannelBundle {
    fn default() -> Self {
        Self::new()
    }
}
