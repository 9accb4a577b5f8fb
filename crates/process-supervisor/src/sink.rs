//! Bounded channel carrying output lines from reader tasks to their consumer

use async_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// What a reader does when the line channel is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for room; the child eventually blocks on its own pipe
    #[default]
    Block,
    /// Drop the line and count it
    DropNewest,
}

/// Sending half of the line channel, cloned into every supervisor
#[derive(Debug, Clone)]
pub struct LineSink {
    tx: Sender<String>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

impl LineSink {
    /// Create a bounded line channel
    pub fn channel(capacity: usize, policy: OverflowPolicy) -> (Self, Receiver<String>) {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        let sink = Self {
            tx,
            policy,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, rx)
    }

    /// Deliver one line according to the overflow policy
    ///
    /// Returns `false` once the receiving side is gone; callers keep draining
    /// their pipe regardless so the child never blocks on a full pipe.
    pub async fn deliver(&self, line: String) -> bool {
        match self.policy {
            OverflowPolicy::Block => self.tx.send(line).await.is_ok(),
            OverflowPolicy::DropNewest => match self.tx.try_send(line) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped.is_power_of_two() {
                        warn!(dropped, "Log channel full, dropping output lines");
                    }
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            },
        }
    }

    /// Number of lines dropped because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Overflow policy of this sink
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Whether the receiving side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn test_block_policy_delivers_in_order() {
        let (sink, rx) = LineSink::channel(4, OverflowPolicy::Block);

        assert!(sink.deliver("one".to_string()).await);
        assert!(sink.deliver("two".to_string()).await);

        assert_eq!(rx.recv().await.unwrap(), "one");
        assert_eq!(rx.recv().await.unwrap(), "two");
        assert_eq!(sink.dropped(), 0);
    }

    #[smol_potat::test]
    async fn test_drop_newest_counts_overflow() {
        let (sink, rx) = LineSink::channel(1, OverflowPolicy::DropNewest);

        assert!(sink.deliver("kept".to_string()).await);
        assert!(sink.deliver("lost".to_string()).await);
        assert!(sink.deliver("lost too".to_string()).await);

        assert_eq!(sink.dropped(), 2);
        assert_eq!(rx.recv().await.unwrap(), "kept");
        assert!(rx.try_recv().is_err());
    }

    #[smol_potat::test]
    async fn test_closed_receiver_reports_false() {
        let (sink, rx) = LineSink::channel(1, OverflowPolicy::Block);
        drop(rx);

        assert!(sink.is_closed());
        assert!(!sink.deliver("nobody listens".to_string()).await);
    }

    #[test]
    fn test_policy_deserializes_snake_case() {
        let policy: OverflowPolicy = serde_json::from_str("\"drop_newest\"").unwrap();
        assert_eq!(policy, OverflowPolicy::DropNewest);
        assert_eq!(OverflowPolicy::default(), OverflowPolicy::Block);
    }
}
