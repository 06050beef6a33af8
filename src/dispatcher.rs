//! Fan-out of discovery events to registered subscribers

use crate::{
    discoverable::DiscoveryEvent,
    error::SubscriberError,
    metrics::record_subscriber_failure,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    any::Any,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Receiver of discovery events.
///
/// Callbacks run synchronously on the dispatch activity; slow callbacks delay
/// delivery of later events to every subscriber.
#[cfg_attr(test, mockall::automock)]
pub trait Subscriber: Send + Sync {
    /// Handle one event
    fn on_event(&self, event: &DiscoveryEvent) -> Result<(), SubscriberError>;

    /// Whether this subscriber can no longer receive events.
    ///
    /// Closed subscribers are dropped after the delivery round that observes it.
    fn is_closed(&self) -> bool {
        false
    }
}

impl<F> Subscriber for F
where
    F: Fn(&DiscoveryEvent) -> Result<(), SubscriberError> + Send + Sync,
{
    fn on_event(&self, event: &DiscoveryEvent) -> Result<(), SubscriberError> {
        self(event)
    }
}

/// Handle identifying one registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription(Uuid);

impl Subscription {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the subscription id
    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription {}", self.0)
    }
}

/// Outcome of one publish round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryReport {
    /// Subscribers that handled the event
    pub delivered: usize,
    /// Subscribers that returned an error or panicked
    pub failed: usize,
}

/// Forwards events into a channel
struct ChannelSubscriber {
    sender: flume::Sender<DiscoveryEvent>,
}

impl Subscriber for ChannelSubscriber {
    fn on_event(&self, event: &DiscoveryEvent) -> Result<(), SubscriberError> {
        // A dropped receiver is a normal way to stop listening
        let _ = self.sender.send(event.clone());
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.sender.is_disconnected()
    }
}

type Entry = (Subscription, Arc<dyn Subscriber>);

/// Thread-safe set of subscribers
#[derive(Default)]
pub struct Dispatcher {
    subscribers: RwLock<Vec<Entry>>,
}

impl Dispatcher {
    /// Create a dispatcher with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber
    pub fn subscribe<S: Subscriber + 'static>(&self, subscriber: S) -> Subscription {
        self.subscribe_arc(Arc::new(subscriber))
    }

    /// Register a shared subscriber
    pub fn subscribe_arc(&self, subscriber: Arc<dyn Subscriber>) -> Subscription {
        let subscription = Subscription::new();
        self.subscribers.write().push((subscription, subscriber));
        debug!("Registered {}", subscription);
        subscription
    }

    /// Register a subscriber that forwards every event into a channel.
    ///
    /// Dropping the receiver unsubscribes on the next delivery round.
    pub fn subscribe_channel(&self) -> (Subscription, flume::Receiver<DiscoveryEvent>) {
        let (sender, receiver) = flume::unbounded();
        let subscription = self.subscribe(ChannelSubscriber { sender });
        (subscription, receiver)
    }

    /// Remove a subscriber.
    ///
    /// Returns `false` if the subscription was not registered. A delivery
    /// round already in progress may still reach the removed subscriber.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(s, _)| *s != subscription);
        let removed = subscribers.len() != before;
        if removed {
            debug!("Removed {}", subscription);
        }
        removed
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver `event` to every currently registered subscriber.
    ///
    /// Delivery works on a copy of the subscriber list taken at the start of
    /// the round, so callbacks may subscribe or unsubscribe freely. A failing
    /// or panicking callback is reported and skipped.
    pub fn publish(&self, event: &DiscoveryEvent) -> DeliveryReport {
        let round: Vec<Entry> = self.subscribers.read().clone();
        let mut report = DeliveryReport::default();
        let mut closed = Vec::new();

        for (subscription, subscriber) in &round {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    record_subscriber_failure();
                    warn!("{} failed on {}: {}", subscription, event, e);
                }
                Err(payload) => {
                    report.failed += 1;
                    record_subscriber_failure();
                    warn!(
                        "{} panicked on {}: {}",
                        subscription,
                        event,
                        panic_message(payload.as_ref())
                    );
                }
            }
            if subscriber.is_closed() {
                closed.push(*subscription);
            }
        }

        for subscription in closed {
            self.unsubscribe(subscription);
        }
        report
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{discoverable::Discoverable, types::AttributeRecord};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    fn event(identity: &str) -> DiscoveryEvent {
        DiscoveryEvent::found(Discoverable::from(AttributeRecord::new(identity)))
    }

    fn counter(count: &Arc<AtomicUsize>) -> impl Subscriber + 'static {
        let count = Arc::clone(count);
        move |_: &DiscoveryEvent| -> Result<(), SubscriberError> {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let dispatcher = Dispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe(counter(&count));
        dispatcher.subscribe(counter(&count));

        let report = dispatcher.publish(&event("S1"));
        assert_eq!(report, DeliveryReport { delivered: 2, failed: 0 });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_mock_subscriber_receives_event() {
        let dispatcher = Dispatcher::new();
        let mut mock = MockSubscriber::new();
        mock.expect_on_event()
            .withf(|e| e.identity().as_str() == "S1")
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_is_closed().return_const(false);
        dispatcher.subscribe(mock);

        dispatcher.publish(&event("S1"));
    }

    #[test]
    fn test_failing_subscriber_is_isolated() {
        let dispatcher = Dispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe(|_: &DiscoveryEvent| -> Result<(), SubscriberError> {
            Err(SubscriberError::new("boom"))
        });
        dispatcher.subscribe(|_: &DiscoveryEvent| -> Result<(), SubscriberError> {
            panic!("subscriber bug")
        });
        dispatcher.subscribe(counter(&count));

        let report = dispatcher.publish(&event("S1"));
        assert_eq!(report, DeliveryReport { delivered: 1, failed: 2 });
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Failures do not unsubscribe
        assert_eq!(dispatcher.subscriber_count(), 3);
    }

    #[test]
    fn test_unsubscribe() {
        let dispatcher = Dispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let subscription = dispatcher.subscribe(counter(&count));

        assert!(dispatcher.unsubscribe(subscription));
        assert!(!dispatcher.unsubscribe(subscription));
        dispatcher.publish(&event("S1"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_during_delivery() {
        let dispatcher = Arc::new(Dispatcher::new());
        let count = Arc::new(AtomicUsize::new(0));
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&dispatcher);
        let target = Arc::clone(&victim);
        dispatcher.subscribe(move |_: &DiscoveryEvent| -> Result<(), SubscriberError> {
            if let (Some(d), Some(s)) = (weak.upgrade(), target.lock().unwrap().take()) {
                d.unsubscribe(s);
            }
            Ok(())
        });
        let victim_subscription = dispatcher.subscribe(counter(&count));
        *victim.lock().unwrap() = Some(victim_subscription);
        dispatcher.subscribe(counter(&count));

        let report = dispatcher.publish(&event("S1"));
        assert_eq!(report.failed, 0);
        assert_eq!(dispatcher.subscriber_count(), 2);

        count.store(0, Ordering::SeqCst);
        dispatcher.publish(&event("S2"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_during_delivery_no_double_delivery() {
        let dispatcher = Arc::new(Dispatcher::new());
        let count = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&dispatcher);
        let late = Arc::clone(&count);
        dispatcher.subscribe(move |_: &DiscoveryEvent| -> Result<(), SubscriberError> {
            if let Some(d) = weak.upgrade() {
                d.subscribe(counter(&late));
            }
            Ok(())
        });

        dispatcher.publish(&event("S1"));
        // The subscriber added mid-round did not see that round
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.subscriber_count(), 2);
    }

    #[test]
    fn test_channel_subscriber() {
        let dispatcher = Dispatcher::new();
        let (_subscription, receiver) = dispatcher.subscribe_channel();

        dispatcher.publish(&event("S1"));
        assert_eq!(receiver.try_recv().unwrap().identity().as_str(), "S1");

        drop(receiver);
        dispatcher.publish(&event("S2"));
        assert_eq!(dispatcher.subscriber_count(), 0);
    }
}
