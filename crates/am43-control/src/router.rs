//! Fan-out of unsolicited device notifications.

use std::collections::HashMap;
use std::sync::Arc;

use am43_metrics::{metric_defs, MetricLabels};
use am43_protocol::{Notification, NotificationKind};
use ble_proxy_protocol::DeviceAddress;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

/// Routes notifications to observers, per device.
///
/// Every observer reads from its own bounded window of the device channel.
/// Publishing never waits: an observer that falls more than the window
/// behind misses the oldest items and carries on with the newest.
#[derive(Debug, Clone)]
pub struct NotificationRouter {
    channels: Arc<Mutex<HashMap<DeviceAddress, broadcast::Sender<Notification>>>>,
    capacity: usize,
}

impl NotificationRouter {
    /// Create a router whose observers buffer up to `capacity` items.
    pub fn new(capacity: usize) -> Self {
        NotificationRouter {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Observe `kind` notifications from `address`.
    pub fn observe(&self, address: &DeviceAddress, kind: NotificationKind) -> Subscription {
        let rx = self
            .channels
            .lock()
            .entry(address.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Subscription {
            address: address.clone(),
            kind,
            rx,
        }
    }

    /// Deliver a notification; returns how many observers were reached.
    pub fn publish(&self, address: &DeviceAddress, notification: Notification) -> usize {
        let channels = self.channels.lock();
        match channels.get(address) {
            Some(tx) => tx.send(notification).unwrap_or(0),
            None => 0,
        }
    }

    /// End every subscription for `address`.
    pub fn remove(&self, address: &DeviceAddress) {
        if self.channels.lock().remove(address).is_some() {
            debug!(%address, "notification observers closed");
        }
    }

    /// Number of live observers of `address`.
    pub fn observer_count(&self, address: &DeviceAddress) -> usize {
        self.channels
            .lock()
            .get(address)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

/// A stream of notifications of one kind from one device.
#[derive(Debug)]
pub struct Subscription {
    address: DeviceAddress,
    kind: NotificationKind,
    rx: broadcast::Receiver<Notification>,
}

impl Subscription {
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn kind(&self) -> NotificationKind {
        self.kind
    }

    /// Wait for the next matching notification.
    ///
    /// Returns `None` once the device session has been closed and every
    /// buffered item has been read.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(notification) if notification.matches(self.kind) => return Some(notification),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(address = %self.address, missed, "observer lagged");
                    let labels = MetricLabels::new(self.address.as_str());
                    metrics::counter!(metric_defs::NOTIFICATIONS_LAGGED.name, &labels.to_labels())
                        .increment(missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// A fresh subscription that starts with the next published item.
    pub fn resubscribe(&self) -> Subscription {
        Subscription {
            address: self.address.clone(),
            kind: self.kind,
            rx: self.rx.resubscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use am43_protocol::{BatteryLevel, LightLevel};

    fn address() -> DeviceAddress {
        "02:AB:CD:EF:01:23".parse().unwrap()
    }

    fn battery(level: u8) -> Notification {
        Notification::Battery(BatteryLevel::from_raw(level))
    }

    #[tokio::test]
    async fn test_kind_filter() {
        let router = NotificationRouter::new(16);
        let mut batteries = router.observe(&address(), NotificationKind::Battery);
        let mut all = router.observe(&address(), NotificationKind::Any);

        router.publish(&address(), Notification::Light(LightLevel::from_raw(3)));
        router.publish(&address(), battery(55));

        assert_eq!(batteries.next().await, Some(battery(55)));
        assert_eq!(all.next().await, Some(Notification::Light(LightLevel::from_raw(3))));
        assert_eq!(all.next().await, Some(battery(55)));
    }

    #[tokio::test]
    async fn test_slow_observer_misses_oldest() {
        let router = NotificationRouter::new(4);
        let mut slow = router.observe(&address(), NotificationKind::Battery);
        for level in 0..10 {
            router.publish(&address(), battery(level));
        }
        // Only the newest four survive, in order
        for level in 6..10 {
            assert_eq!(slow.next().await, Some(battery(level)));
        }
    }

    #[tokio::test]
    async fn test_remove_ends_subscriptions() {
        let router = NotificationRouter::new(4);
        let mut sub = router.observe(&address(), NotificationKind::Any);
        router.publish(&address(), battery(10));
        router.remove(&address());

        assert_eq!(sub.next().await, Some(battery(10)));
        assert_eq!(sub.next().await, None);
        assert_eq!(router.publish(&address(), battery(11)), 0);
    }

    #[tokio::test]
    async fn test_publish_counts_observers() {
        let router = NotificationRouter::new(4);
        assert_eq!(router.publish(&address(), battery(1)), 0);

        let sub = router.observe(&address(), NotificationKind::Any);
        let again = sub.resubscribe();
        assert_eq!(router.observer_count(&address()), 2);
        assert_eq!(router.publish(&address(), battery(2)), 2);

        drop(sub);
        drop(again);
        assert_eq!(router.observer_count(&address()), 0);
    }
}
