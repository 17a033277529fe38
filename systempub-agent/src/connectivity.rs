//! Connectivity broadcast from the connection manager to its listeners
//!
//! Every listener owns a single latest-value slot. Broadcasting overwrites
//! the slot and never waits: a listener busy elsewhere sees only the most
//! recent signal when it comes back, so a reconnect is never hidden behind
//! the disconnects that preceded it. A listener that went away is pruned.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

struct Listener {
    name: String,
    tx: watch::Sender<bool>,
}

/// Registry of connectivity listeners
#[derive(Clone, Default)]
pub struct ConnectivityHub {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl ConnectivityHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener and return its receiving end.
    /// `true` means "session usable, republish discovery and state".
    /// The initial `false` is not reported as a change.
    pub fn register(&self, name: impl Into<String>) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        let name = name.into();
        debug!(listener = %name, "Registered connectivity listener");
        self.listeners.lock().push(Listener { name, tx });
        rx
    }

    /// Store `connected` in every listener's slot without blocking.
    /// Returns how many listeners were notified.
    pub fn broadcast(&self, connected: bool) -> usize {
        let mut listeners = self.listeners.lock();
        listeners.retain(|listener| match listener.tx.send(connected) {
            Ok(()) => true,
            Err(_) => {
                debug!(listener = %listener.name, "Listener gone, removing");
                false
            }
        });
        listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_each_listener_receives_one_signal() {
        let hub = ConnectivityHub::new();
        let mut receivers: Vec<_> = (0..5).map(|i| hub.register(format!("l{i}"))).collect();

        assert_eq!(hub.broadcast(true), 5);

        for rx in receivers.iter_mut() {
            rx.changed().await.unwrap();
            assert!(*rx.borrow_and_update());
            assert!(!rx.has_changed().unwrap());
        }
    }

    #[tokio::test]
    async fn test_reconnect_survives_burst_of_disconnects() {
        let hub = ConnectivityHub::new();
        let mut rx = hub.register("busy");

        for _ in 0..10 {
            hub.broadcast(false);
        }
        hub.broadcast(true);

        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_stalled_listener_does_not_block() {
        let hub = ConnectivityHub::new();
        let _stalled = hub.register("stalled");
        let mut active = hub.register("active");

        let storm = tokio::time::timeout(Duration::from_secs(1), async {
            for _ in 0..100 {
                hub.broadcast(true);
                active.borrow_and_update();
            }
        })
        .await;
        assert!(storm.is_ok());
        assert_eq!(hub.listener_count(), 2);
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let hub = ConnectivityHub::new();
        let kept = hub.register("kept");
        drop(hub.register("dropped"));

        assert_eq!(hub.broadcast(false), 1);
        assert_eq!(hub.listener_count(), 1);
        drop(kept);
    }
}
