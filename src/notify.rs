use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;
const FIREHOSE_CAPACITY: usize = 4096;

/// One committed change, addressed to the parties a notification system
/// would tell about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub provider_id: Ulid,
    /// Set for booking events.
    pub client_id: Option<Ulid>,
    pub event: Event,
}

/// Broadcast hub for committed events: one channel per provider plus a
/// firehose carrying everything. Delivery is best effort.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notice>>,
    firehose: broadcast::Sender<Notice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            firehose: broadcast::channel(FIREHOSE_CAPACITY).0,
        }
    }

    /// Subscribe to one provider's events. Creates the channel if needed.
    pub fn subscribe(&self, provider_id: Ulid) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(provider_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to every event on this engine.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Notice> {
        self.firehose.subscribe()
    }

    /// Publish a notice. Never fails: no listeners or lagging listeners are
    /// not the sender's problem.
    pub fn send(&self, notice: Notice) {
        if let Some(sender) = self.channels.get(&notice.provider_id) {
            let _ = sender.send(notice.clone());
        }
        let _ = self.firehose.send(notice);
    }

    /// Drop a provider's channel once nobody listens to it.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}
