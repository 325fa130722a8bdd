use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::warn;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Stream of events handed to a subscriber.
pub type EventStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Multicast publish/subscribe channel.
///
/// Every subscriber gets its own bounded buffer of `capacity` events. A
/// subscriber that falls behind loses the oldest events and keeps going;
/// publishers never wait on slow subscribers.
#[derive(Debug, Clone)]
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        EventBus { tx }
    }

    /// Publishes `event` to every current subscriber, returning how many got it.
    pub fn publish(&self, event: E) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Subscribes to every event published from now on.
    pub fn subscribe(&self) -> EventStream<E> {
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(|result| {
            futures::future::ready(match result {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, oldest events dropped");
                    None
                }
            })
        });
        Box::pin(stream)
    }

    /// Subscribes only to events convertible into `T`.
    pub fn subscribe_to<T>(&self) -> EventStream<T>
    where
        T: TryFrom<E> + Send + 'static,
    {
        let stream = self
            .subscribe()
            .filter_map(|event| futures::future::ready(T::try_from(event).ok()));
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[derive(Debug, Clone, PartialEq)]
    enum Sample {
        Number(u32),
        Text(String),
    }

    #[derive(Debug, PartialEq)]
    struct Number(u32);

    impl TryFrom<Sample> for Number {
        type Error = Sample;

        fn try_from(value: Sample) -> Result<Self, Self::Error> {
            match value {
                Sample::Number(n) => Ok(Number(n)),
                other => Err(other),
            }
        }
    }

    #[tokio::test]
    async fn every_subscriber_receives_each_event() {
        let bus = EventBus::new(16);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.publish(Sample::Number(1)), 2);

        assert_eq!(first.next().await, Some(Sample::Number(1)));
        assert_eq!(second.next().await, Some(Sample::Number(1)));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus: EventBus<Sample> = EventBus::new(4);
        assert_eq!(bus.publish(Sample::Text("dropped".into())), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn typed_subscription_filters_other_events() {
        let bus = EventBus::new(16);
        let mut numbers = bus.subscribe_to::<Number>();

        bus.publish(Sample::Text("skip".into()));
        bus.publish(Sample::Number(7));

        let received = timeout(Duration::from_secs(1), numbers.next()).await.unwrap();
        assert_eq!(received, Some(Number(7)));
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_oldest_events() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe();

        for n in 0..5 {
            bus.publish(Sample::Number(n));
        }

        assert_eq!(slow.next().await, Some(Sample::Number(3)));
        assert_eq!(slow.next().await, Some(Sample::Number(4)));
    }
}
