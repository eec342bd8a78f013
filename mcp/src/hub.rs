//! Fan-out of server events to live subscribers.
//!
//! Delivery is best-effort: a subscriber whose send fails is dropped from the
//! hub and the rest of the batch still goes out. Nothing is retried.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DeliveryError;
use crate::events::ServerEvent;

pub type SubscriberId = u64;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct SinkError(pub String);

/// Outbound half of one live connection.
pub trait EventSink: Send + Sync {
    /// Queues an already-serialized event.
    fn send_text(&self, text: &str) -> Result<(), SinkError>;

    /// Liveness probe.
    fn ping(&self) -> Result<(), SinkError>;

    /// Asks the connection to close. Best-effort.
    fn close(&self) {}
}

/// Per-subscriber outcome of one broadcast.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<SubscriberId>,
    pub failed: Vec<DeliveryError>,
}

impl BroadcastReport {
    pub fn is_noop(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty()
    }
}

#[derive(Default)]
pub struct SubscriberHub {
    subscribers: Mutex<BTreeMap<SubscriberId, Arc<dyn EventSink>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for SubscriberHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHub").field("subscribers", &self.len()).finish()
    }
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sink: Arc<dyn EventSink>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let total = {
            let mut subscribers = self.subscribers.lock();
            subscribers.insert(id, sink);
            subscribers.len()
        };
        debug!(subscriber = id, total, "subscriber registered");
        id
    }

    /// Returns false when `id` was already gone.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let (removed, total) = {
            let mut subscribers = self.subscribers.lock();
            let removed = subscribers.remove(&id).is_some();
            (removed, subscribers.len())
        };
        if removed {
            debug!(subscriber = id, total, "subscriber unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().contains_key(&id)
    }

    /// Sends `event` to every subscriber. Failed subscribers are removed and
    /// reported; the call itself never fails.
    pub fn broadcast(&self, event: &ServerEvent) -> BroadcastReport {
        let targets: Vec<(SubscriberId, Arc<dyn EventSink>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect();
        let mut report = BroadcastReport::default();
        if targets.is_empty() {
            debug!(event = event.type_name(), "no subscribers to broadcast to");
            return report;
        }
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                warn!(event = event.type_name(), error = %e, "failed to encode event");
                return report;
            }
        };
        for (id, sink) in targets {
            match sink.send_text(&text) {
                Ok(()) => report.delivered.push(id),
                Err(e) => report.failed.push(DeliveryError {
                    subscriber: id,
                    reason: e.0,
                }),
            }
        }
        for failure in &report.failed {
            warn!(subscriber = failure.subscriber, reason = %failure.reason, "dropping unreachable subscriber");
            self.unregister(failure.subscriber);
        }
        debug!(
            event = event.type_name(),
            version = event.version,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "broadcast complete"
        );
        report
    }

    /// Sends `event` to one subscriber, dropping it on failure.
    pub fn send_to(&self, id: SubscriberId, event: &ServerEvent) -> Result<(), DeliveryError> {
        let sink = self.subscribers.lock().get(&id).cloned();
        let Some(sink) = sink else {
            return Err(DeliveryError {
                subscriber: id,
                reason: "not registered".to_string(),
            });
        };
        let result = serde_json::to_string(event)
            .map_err(|e| SinkError(e.to_string()))
            .and_then(|text| sink.send_text(&text));
        result.map_err(|e| {
            self.unregister(id);
            DeliveryError {
                subscriber: id,
                reason: e.0,
            }
        })
    }

    /// Probes one subscriber; an unreachable one is unregistered.
    pub fn ping(&self, id: SubscriberId) -> Result<(), DeliveryError> {
        let sink = self.subscribers.lock().get(&id).cloned();
        let Some(sink) = sink else {
            return Err(DeliveryError {
                subscriber: id,
                reason: "not registered".to_string(),
            });
        };
        sink.ping().map_err(|e| {
            self.unregister(id);
            DeliveryError {
                subscriber: id,
                reason: e.0,
            }
        })
    }

    /// Closes and forgets every subscriber. Returns how many there were.
    pub fn close_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.subscribers.lock());
        for sink in drained.values() {
            sink.close();
        }
        drained.len()
    }
}

/// Pings `id` every `period` until the ping fails, the subscriber goes away,
/// or `cancel` fires. A failed ping unregisters the subscriber.
pub async fn heartbeat(hub: &SubscriberHub, id: SubscriberId, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = hub.ping(id) {
            debug!(subscriber = id, reason = %e.reason, "heartbeat stopped");
            break;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::events::EventKind;

    /// Sink that records what it receives and can be switched to failing.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub sent: Mutex<Vec<String>>,
        pub pings: AtomicU64,
        pub broken: AtomicBool,
        pub closed: AtomicBool,
    }

    impl RecordingSink {
        pub fn broken() -> Self {
            let sink = Self::default();
            sink.broken.store(true, Ordering::SeqCst);
            sink
        }

        pub fn events(&self) -> Vec<serde_json::Value> {
            self.sent
                .lock()
                .iter()
                .map(|text| serde_json::from_str(text).unwrap())
                .collect()
        }
    }

    impl EventSink for RecordingSink {
        fn send_text(&self, text: &str) -> Result<(), SinkError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(SinkError("connection reset".into()));
            }
            self.sent.lock().push(text.to_string());
            Ok(())
        }

        fn ping(&self) -> Result<(), SinkError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(SinkError("connection reset".into()));
            }
            self.pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn event() -> ServerEvent {
        ServerEvent::new(
            EventKind::ProjectDeleted {
                project_name: "demo".into(),
            },
            1,
            "test",
        )
    }

    #[test]
    fn broadcast_to_nobody_is_a_noop() {
        let hub = SubscriberHub::new();
        assert!(hub.broadcast(&event()).is_noop());
    }

    #[test]
    fn one_failure_does_not_stop_the_rest() {
        let hub = SubscriberHub::new();
        let first = Arc::new(RecordingSink::default());
        let broken = Arc::new(RecordingSink::broken());
        let last = Arc::new(RecordingSink::default());
        let first_id = hub.register(first.clone());
        let broken_id = hub.register(broken.clone());
        let last_id = hub.register(last.clone());

        let report = hub.broadcast(&event());
        assert_eq!(report.delivered, vec![first_id, last_id]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].subscriber, broken_id);

        assert_eq!(first.events().len(), 1);
        assert_eq!(last.events()[0]["type"], "project_deleted");
        assert!(!hub.contains(broken_id));
        assert_eq!(hub.len(), 2);
    }

    #[test]
    fn send_to_and_ping_drop_failed_subscribers() {
        let hub = SubscriberHub::new();
        let sink = Arc::new(RecordingSink::default());
        let id = hub.register(sink.clone());
        hub.send_to(id, &event()).unwrap();
        hub.ping(id).unwrap();
        assert_eq!(sink.pings.load(Ordering::SeqCst), 1);

        sink.broken.store(true, Ordering::SeqCst);
        assert!(hub.ping(id).is_err());
        assert!(!hub.contains(id));
        assert!(hub.send_to(id, &event()).is_err());
    }

    #[test]
    fn close_all_empties_the_hub() {
        let hub = SubscriberHub::new();
        let sink = Arc::new(RecordingSink::default());
        hub.register(sink.clone());
        hub.register(Arc::new(RecordingSink::default()));
        assert_eq!(hub.close_all(), 2);
        assert!(hub.is_empty());
        assert!(sink.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn heartbeat_unregisters_dead_subscriber() {
        let hub = SubscriberHub::new();
        let sink = Arc::new(RecordingSink::default());
        let id = hub.register(sink.clone());
        let flip = sink.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            flip.broken.store(true, Ordering::SeqCst);
        });

        tokio::time::timeout(
            Duration::from_secs(2),
            heartbeat(&hub, id, Duration::from_millis(10), CancellationToken::new()),
        )
        .await
        .unwrap();
        assert!(sink.pings.load(Ordering::SeqCst) >= 1);
        assert!(!hub.contains(id));
    }

    #[tokio::test]
    async fn heartbeat_stops_on_cancel() {
        let hub = SubscriberHub::new();
        let id = hub.register(Arc::new(RecordingSink::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        heartbeat(&hub, id, Duration::from_millis(10), cancel).await;
        assert!(hub.contains(id));
    }
}
