//! Notifications published by the validator to the presentation layer.

use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum ValidatorEvent {
    /// The key/validation service became reachable or unreachable.
    ServiceAvailabilityChanged(bool),
    /// Profile image download progress, `0.0..=1.0`.
    DownloadProgress(f64),
    /// Finished profile image download; `None` when it failed.
    ProfileImage(Option<Vec<u8>>),
}

/// Fan-out channel for [`ValidatorEvent`]s. Publishing never blocks and
/// events are dropped when nobody is subscribed.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ValidatorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ValidatorEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ValidatorEvent) {
        let _ = self.sender.send(event);
    }
}
