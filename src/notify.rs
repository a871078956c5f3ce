use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, SpaceType};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub carrying committed journal events, one channel per space type.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<SpaceType, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events for a space type. Creates the channel if needed.
    pub fn subscribe(&self, space_type: SpaceType) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(space_type)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, space_type: SpaceType, event: &Event) {
        if let Some(sender) = self.channels.get(&space_type) {
            let _ = sender.send(event.clone());
        }
    }
}
