use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::trace;

use crate::{broker::BoxStream, types::QueueEvent};

/// Process-wide event channel for queue events.
///
/// Constructed once and passed to the components that publish. Each
/// subscriber sees every event published after it subscribed, at most once.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Fan the event out to current subscribers; returns how many received it
    pub fn publish(&self, event: QueueEvent) -> usize {
        trace!(event = event.event_name(), queue = event.queue_name(), "Publishing queue event");
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a stream, skipping over lagged gaps
    pub fn stream(&self) -> BoxStream<QueueEvent> {
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(|result| result.ok());
        Box::pin(stream)
    }

    /// Stream of events whose name matches exactly, e.g. `job.completed`
    pub fn stream_named(&self, name: &'static str) -> BoxStream<QueueEvent> {
        let stream = BroadcastStream::new(self.sender.subscribe())
            .filter_map(|result| result.ok())
            .filter(move |event| event.event_name() == name);
        Box::pin(stream)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobId;

    fn added(queue: &str) -> QueueEvent {
        QueueEvent::JobAdded {
            queue_name: queue.to_string(),
            job_id: JobId::new(),
            job_type: "t".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.publish(added("q")), 2);
        assert_eq!(a.recv().await.unwrap().event_name(), "job.added");
        assert_eq!(b.recv().await.unwrap().event_name(), "job.added");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(added("q")), 0);
    }

    #[tokio::test]
    async fn test_named_stream_filters() {
        let bus = EventBus::new(16);
        let mut bulk = bus.stream_named("jobs.bulk_added");

        bus.publish(added("q"));
        bus.publish(QueueEvent::JobsBulkAdded { queue_name: "q".to_string(), count: 2 });

        let event = bulk.next().await.unwrap();
        assert_eq!(event, QueueEvent::JobsBulkAdded { queue_name: "q".to_string(), count: 2 });
    }
}
