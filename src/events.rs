//! Lifecycle event publication.
//!
//! Two delivery paths share one [`EventBus`]:
//! - synchronous subscribers registered with [`EventBus::subscribe`]
//! - a `tokio::sync::broadcast` stream for async consumers
//!
//! Delivery is fire-and-forget. A subscriber that returns an error or panics
//! is logged and counted, and the remaining subscribers still run. The
//! operation that emitted the event has already committed its state change
//! and never sees the failure.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::registry::Robot;
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    TaskPosted,
    TaskClaimed,
    TelemetrySubmitted,
    TaskVerified,
    PaymentSettled,
    RobotRegistered,
    RobotUpdated,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An event carrying the full resulting entity snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum LifecycleEvent {
    TaskPosted(Task),
    TaskClaimed(Task),
    TelemetrySubmitted(Task),
    TaskVerified(Task),
    PaymentSettled(Task),
    RobotRegistered(Robot),
    RobotUpdated(Robot),
}

impl LifecycleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LifecycleEvent::TaskPosted(_) => EventKind::TaskPosted,
            LifecycleEvent::TaskClaimed(_) => EventKind::TaskClaimed,
            LifecycleEvent::TelemetrySubmitted(_) => EventKind::TelemetrySubmitted,
            LifecycleEvent::TaskVerified(_) => EventKind::TaskVerified,
            LifecycleEvent::PaymentSettled(_) => EventKind::PaymentSettled,
            LifecycleEvent::RobotRegistered(_) => EventKind::RobotRegistered,
            LifecycleEvent::RobotUpdated(_) => EventKind::RobotUpdated,
        }
    }

    pub fn task(&self) -> Option<&Task> {
        match self {
            LifecycleEvent::TaskPosted(t)
            | LifecycleEvent::TaskClaimed(t)
            | LifecycleEvent::TelemetrySubmitted(t)
            | LifecycleEvent::TaskVerified(t)
            | LifecycleEvent::PaymentSettled(t) => Some(t),
            _ => None,
        }
    }

    pub fn robot(&self) -> Option<&Robot> {
        match self {
            LifecycleEvent::RobotRegistered(r) | LifecycleEvent::RobotUpdated(r) => Some(r),
            _ => None,
        }
    }
}

/// Receives lifecycle events synchronously.
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent) -> anyhow::Result<()>;
}

impl<F> EventSubscriber for F
where
    F: Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Subscription {
    filter: Option<EventKind>,
    subscriber: Arc<dyn EventSubscriber>,
}

struct BusInner {
    subscribers: RwLock<HashMap<SubscriptionId, Arc<Subscription>>>,
    /// Registration order, so delivery order is deterministic.
    order: RwLock<Vec<SubscriptionId>>,
    events_tx: broadcast::Sender<LifecycleEvent>,
    failed_deliveries: AtomicU64,
}

/// Cheaply clonable handle; clones share subscribers and the stream.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("failed_deliveries", &self.failed_deliveries())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                order: RwLock::new(Vec::new()),
                events_tx,
                failed_deliveries: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscriber for one event kind, or all kinds if `filter` is `None`.
    pub fn subscribe(
        &self,
        filter: Option<EventKind>,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        let subscription = Arc::new(Subscription { filter, subscriber });
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, subscription);
        self.inner
            .order
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(id);
        id
    }

    pub fn subscribe_fn<F>(&self, filter: Option<EventKind>, handler: F) -> SubscriptionId
    where
        F: Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(filter, Arc::new(handler))
    }

    /// Returns `true` if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some();
        if removed {
            self.inner
                .order
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|existing| *existing != id);
        }
        removed
    }

    /// Async stream of every published event.
    pub fn stream(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Number of subscriber invocations that failed or panicked.
    pub fn failed_deliveries(&self) -> u64 {
        self.inner.failed_deliveries.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> Vec<(SubscriptionId, Arc<Subscription>)> {
        let order = self
            .inner
            .order
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let subscribers = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner());
        order
            .into_iter()
            .filter_map(|id| subscribers.get(&id).map(|s| (id, Arc::clone(s))))
            .collect()
    }

    /// Deliver an event. Never fails.
    pub fn publish(&self, event: LifecycleEvent) {
        let kind = event.kind();
        tracing::debug!(event = %kind, "Publishing lifecycle event");

        // Locks are released before any subscriber runs, so subscribers may
        // subscribe or unsubscribe from inside a callback.
        for (id, subscription) in self.snapshot() {
            if subscription.filter.is_some_and(|f| f != kind) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                subscription.subscriber.on_event(&event)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.inner.failed_deliveries.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        event = %kind,
                        subscription = %id,
                        "Event subscriber failed: {}",
                        e
                    );
                }
                Err(_) => {
                    self.inner.failed_deliveries.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(event = %kind, subscription = %id, "Event subscriber panicked");
                }
            }
        }

        // No receivers is not an error.
        let _ = self.inner.events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegisterRobot;
    use chrono::Utc;
    use std::sync::Mutex;

    fn robot_event() -> LifecycleEvent {
        LifecycleEvent::RobotRegistered(Robot::new(
            RegisterRobot {
                wallet: "0xabc".into(),
                ..RegisterRobot::default()
            },
            Utc::now(),
        ))
    }

    #[test]
    fn failing_and_panicking_subscribers_are_isolated() {
        let bus = EventBus::new(8);
        let delivered = Arc::new(Mutex::new(0));

        bus.subscribe_fn(None, |_| anyhow::bail!("listener exploded"));
        bus.subscribe_fn(None, |_| panic!("listener panicked"));
        let counter = delivered.clone();
        bus.subscribe_fn(None, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        bus.publish(robot_event());
        assert_eq!(*delivered.lock().unwrap(), 1);
        assert_eq!(bus.failed_deliveries(), 2);
    }

    #[test]
    fn filters_by_kind() {
        let bus = EventBus::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe_fn(Some(EventKind::RobotUpdated), move |e| {
            sink.lock().unwrap().push(e.kind());
            Ok(())
        });

        bus.publish(robot_event());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new(8);
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let id = bus.subscribe_fn(None, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        bus.publish(robot_event());
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(robot_event());
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn subscriber_may_unsubscribe_itself() {
        let bus = EventBus::new(8);
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let handle = bus.clone();
        let own = slot.clone();
        let id = bus.subscribe_fn(None, move |_| {
            if let Some(id) = *own.lock().unwrap() {
                handle.unsubscribe(id);
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(id);

        bus.publish(robot_event());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn stream_receives_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.stream();
        bus.publish(robot_event());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), EventKind::RobotRegistered);
        assert_eq!(event.robot().map(Robot::wallet), Some("0xabc"));
    }

    #[test]
    fn publish_without_receivers_is_fine() {
        EventBus::new(1).publish(robot_event());
    }

    #[test]
    fn serializes_with_event_tag() {
        let json = serde_json::to_value(robot_event()).unwrap();
        assert_eq!(json["event"], "RobotRegistered");
        assert_eq!(json["payload"]["wallet"], "0xabc");
    }
}
