//! Notifications to the embedding host about foreground presence

use async_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Callbacks into the host application
///
/// Implementations must return quickly; they are invoked while the
/// orchestrator holds its presence lock.
pub trait HostHooks: Send + Sync {
    /// At least one process is intended to be running
    ///
    /// Called after every START that leaves processes registered, so repeated
    /// calls refresh the presence rather than stacking it.
    fn presence_established(&self, running: usize);

    /// No process is running any more
    fn presence_removed(&self);

    /// The host may tear itself down
    fn teardown_requested(&self);
}

/// Hooks that only log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHooks;

impl HostHooks for TracingHooks {
    fn presence_established(&self, running: usize) {
        info!(running, "Foreground presence established");
    }

    fn presence_removed(&self) {
        info!("Foreground presence removed");
    }

    fn teardown_requested(&self) {
        info!("Host teardown requested");
    }
}

/// Signal forwarded by [`ChannelHooks`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "signal")]
pub enum HostSignal {
    /// See [`HostHooks::presence_established`]
    PresenceEstablished {
        /// Registered processes at the time of the call
        running: usize,
    },
    /// See [`HostHooks::presence_removed`]
    PresenceRemoved,
    /// See [`HostHooks::teardown_requested`]
    TeardownRequested,
}

/// Hooks forwarding every call into a channel
#[derive(Debug, Clone)]
pub struct ChannelHooks {
    tx: Sender<HostSignal>,
}

impl ChannelHooks {
    /// Create hooks and the receiver observing them
    pub fn new() -> (Self, Receiver<HostSignal>) {
        let (tx, rx) = async_channel::unbounded();
        (Self { tx }, rx)
    }

    fn send(&self, signal: HostSignal) {
        if self.tx.try_send(signal).is_err() {
            warn!(?signal, "Host signal dropped, no receiver");
        }
    }
}

impl HostHooks for ChannelHooks {
    fn presence_established(&self, running: usize) {
        self.send(HostSignal::PresenceEstablished { running });
    }

    fn presence_removed(&self) {
        self.send(HostSignal::PresenceRemoved);
    }

    fn teardown_requested(&self) {
        self.send(HostSignal::TeardownRequested);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_hooks_forward_in_order() {
        let (hooks, rx) = ChannelHooks::new();
        hooks.presence_established(2);
        hooks.presence_removed();
        hooks.teardown_requested();

        assert_eq!(rx.try_recv().unwrap(), HostSignal::PresenceEstablished { running: 2 });
        assert_eq!(rx.try_recv().unwrap(), HostSignal::PresenceRemoved);
        assert_eq!(rx.try_recv().unwrap(), HostSignal::TeardownRequested);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_signal_serialization() {
        let json = serde_json::to_string(&HostSignal::PresenceEstablished { running: 1 }).unwrap();
        assert_eq!(json, r#"{"signal":"presence_established","running":1}"#);
    }
}
