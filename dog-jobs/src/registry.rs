use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::{
    QueueError, QueueResult,
    broker::{Broker, QueueHandle},
    types::QueueDefinition,
};

/// Single source of truth for queue name → live handle.
///
/// Populated at startup; reads never block each other. The lock is never
/// held across a broker call.
pub struct QueueRegistry {
    broker: Arc<dyn Broker>,
    queues: RwLock<HashMap<String, QueueHandle>>,
}

impl QueueRegistry {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            queues: RwLock::new(HashMap::new()),
        }
    }

    /// Validate a definition, declare it at the broker and store its handle
    pub async fn register(&self, definition: QueueDefinition) -> QueueResult<QueueHandle> {
        definition.validate()?;
        let name = definition.name.clone();

        if self.queues.read().contains_key(&name) {
            return Err(QueueError::Configuration(format!("queue '{}' is already registered", name)));
        }

        self.broker.create(&definition).await.map_err(|e| {
            QueueError::Configuration(format!("broker refused queue '{}': {}", name, e))
        })?;

        let handle = QueueHandle::new(definition, self.broker.clone());
        {
            let mut queues = self.queues.write();
            // A concurrent register for the same name may have won while we awaited the broker
            if queues.contains_key(&name) {
                return Err(QueueError::Configuration(format!("queue '{}' is already registered", name)));
            }
            queues.insert(name.clone(), handle.clone());
        }

        info!(queue = %name, concurrency = handle.concurrency(), "Registered queue");
        Ok(handle)
    }

    /// Register every definition in order, stopping at the first failure
    pub async fn register_all(
        &self,
        definitions: impl IntoIterator<Item = QueueDefinition>,
    ) -> QueueResult<Vec<QueueHandle>> {
        let mut handles = Vec::new();
        for definition in definitions {
            handles.push(self.register(definition).await?);
        }
        Ok(handles)
    }

    pub fn resolve(&self, name: &str) -> QueueResult<QueueHandle> {
        self.queues
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queues.read().contains_key(name)
    }

    /// Registered queue names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of every handle, sorted by queue name
    pub fn handles(&self) -> Vec<QueueHandle> {
        let mut handles: Vec<QueueHandle> = self.queues.read().values().cloned().collect();
        handles.sort_by(|a, b| a.name().cmp(b.name()));
        handles
    }

    pub fn len(&self) -> usize {
        self.queues.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.read().is_empty()
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }
}
