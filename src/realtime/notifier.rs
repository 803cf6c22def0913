//! Change notification system for broadcasting entity changes to channel subscribers.

use tokio::sync::broadcast;

use super::event::ChangeEvent;

/// Buffered events per subscriber before a slow one starts skipping.
const CHANNEL_CAPACITY: usize = 100;

/// Pub/sub notifier for broadcasting changes to every subscriber.
///
/// Delivery is best-effort: an event emitted while nobody is subscribed is
/// dropped, and there is no replay for late subscribers.
#[derive(Clone, Debug)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to receive change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers.
    pub fn notify(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
