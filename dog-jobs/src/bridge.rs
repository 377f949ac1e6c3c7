use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::{
    QueueError, QueueResult,
    broker::BrokerSubscription,
    bus::EventBus,
    registry::QueueRegistry,
    types::{BrokerNotification, LifecycleEvent, LifecycleKind, QueueEvent, SubscriptionId},
};

/// Identifies the live broker subscription of one queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub queue: String,
    pub id: SubscriptionId,
}

struct BridgeSubscription {
    id: SubscriptionId,
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<Box<dyn BrokerSubscription>>,
}

/// Republishes broker lifecycle notifications on the event bus.
///
/// Holds at most one broker subscription per queue. The table lock is held
/// across the broker `subscribe` call so concurrent callers for the same
/// queue share one subscription.
pub struct EventBridge {
    registry: Arc<QueueRegistry>,
    bus: EventBus,
    subscriptions: Mutex<HashMap<String, BridgeSubscription>>,
    next_id: AtomicU64,
}

impl EventBridge {
    pub fn new(registry: Arc<QueueRegistry>, bus: EventBus) -> Self {
        Self {
            registry,
            bus,
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to a registered queue unless already subscribed
    pub async fn ensure_subscribed(&self, queue: &str) -> QueueResult<SubscriptionHandle> {
        let handle = self.registry.resolve(queue)?;
        let mut subscriptions = self.subscriptions.lock().await;

        if let Some(existing) = subscriptions.get(queue) {
            return Ok(SubscriptionHandle {
                queue: queue.to_string(),
                id: existing.id,
            });
        }

        let subscription = handle.subscribe().await.map_err(|source| QueueError::Broker {
            queue: queue.to_string(),
            source,
        })?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join_handle = tokio::spawn(
            forward_notifications(queue.to_string(), subscription, self.bus.clone(), shutdown_rx)
                .in_current_span(),
        );

        subscriptions.insert(
            queue.to_string(),
            BridgeSubscription {
                id,
                shutdown_tx,
                join_handle,
            },
        );
        info!(queue = %queue, subscription = %id, "Subscribed to queue lifecycle events");

        Ok(SubscriptionHandle {
            queue: queue.to_string(),
            id,
        })
    }

    /// Subscribe to every registered queue
    pub async fn ensure_subscribed_all(&self) -> QueueResult<Vec<SubscriptionHandle>> {
        let mut handles = Vec::new();
        for name in self.registry.names() {
            handles.push(self.ensure_subscribed(&name).await?);
        }
        Ok(handles)
    }

    /// Stop every forwarding task and release its broker subscription
    pub async fn close_all(&self) {
        let drained: Vec<(String, BridgeSubscription)> = {
            let mut subscriptions = self.subscriptions.lock().await;
            subscriptions.drain().collect()
        };

        if drained.is_empty() {
            return;
        }

        let count = drained.len();
        for (queue, subscription) in drained {
            let _ = subscription.shutdown_tx.send(());
            match subscription.join_handle.await {
                Ok(broker_subscription) => {
                    if let Err(err) = broker_subscription.close().await {
                        error!(queue = %queue, error = %err, "Failed to close broker subscription");
                    }
                }
                Err(err) => {
                    error!(queue = %queue, error = %err, "Event forwarding task failed");
                }
            }
        }
        info!(count, "Closed queue event subscriptions");
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    pub async fn is_subscribed(&self, queue: &str) -> bool {
        self.subscriptions.lock().await.contains_key(queue)
    }
}

/// Forward until shut down or the broker ends the stream; hands the
/// subscription back so the caller can close it.
async fn forward_notifications(
    queue: String,
    mut subscription: Box<dyn BrokerSubscription>,
    bus: EventBus,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> Box<dyn BrokerSubscription> {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            next = subscription.next() => match next {
                Some(notification) => publish_lifecycle(&queue, &bus, notification),
                None => {
                    warn!(queue = %queue, "Broker closed the lifecycle stream");
                    break;
                }
            }
        }
    }
    subscription
}

fn publish_lifecycle(queue: &str, bus: &EventBus, notification: BrokerNotification) {
    let event = LifecycleEvent::from_notification(queue, notification);
    match event.kind {
        LifecycleKind::Waiting | LifecycleKind::Active => {
            debug!(queue = %queue, job_id = %event.job_id, "Job is {}", event.kind.event_name());
        }
        LifecycleKind::Completed => {
            info!(queue = %queue, job_id = %event.job_id, "Job completed");
        }
        LifecycleKind::Failed => {
            let reason = event.payload.as_ref().and_then(|p| p.as_str()).unwrap_or("unknown");
            error!(queue = %queue, job_id = %event.job_id, reason, "Job failed");
        }
        LifecycleKind::Stalled => {
            warn!(queue = %queue, job_id = %event.job_id, "Job stalled");
        }
    }
    bus.publish(QueueEvent::Lifecycle(event));
}
