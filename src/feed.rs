use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::{Interval, MissedTickBehavior};
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for change events, one channel per partner.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
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
        }
    }

    /// Subscribe to a partner's events. Creates the channel if needed.
    pub fn subscribe(&self, partner_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(partner_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        if let Some(sender) = self.channels.get(&event.partner_id()) {
            let _ = sender.send(event.clone());
        }
    }
}

/// Source of "state may have changed, refetch" signals for a sync loop.
///
/// Implementations decide cadence only. Correctness comes from the
/// generation checks in [`crate::sync::SyncStore`], so a push feed and a
/// polling feed are interchangeable.
#[async_trait]
pub trait ChangeFeed: Send {
    /// Resolve when a refetch is due. `false` means the feed is finished.
    async fn changed(&mut self) -> bool;
}

/// Pull-based feed: fires immediately, then every `period`.
pub struct IntervalFeed {
    interval: Interval,
}

impl IntervalFeed {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl ChangeFeed for IntervalFeed {
    async fn changed(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Push-based feed over a [`NotifyHub`] subscription. Fires once on start so
/// the first snapshot is loaded, then on every event. A lagged receiver also
/// fires: the refetch covers whatever was dropped.
pub struct BroadcastFeed {
    rx: broadcast::Receiver<Event>,
    primed: bool,
}

impl BroadcastFeed {
    pub fn new(rx: broadcast::Receiver<Event>) -> Self {
        Self { rx, primed: false }
    }
}

#[async_trait]
impl ChangeFeed for BroadcastFeed {
    async fn changed(&mut self) -> bool {
        if !self.primed {
            self.primed = true;
            return true;
        }
        match self.rx.recv().await {
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                // Collapse a burst of events into one refetch.
                while self.rx.try_recv().is_ok() {}
                true
            }
            Err(broadcast::error::RecvError::Closed) => false,
        }
    }
}
