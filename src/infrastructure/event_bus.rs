use crate::domain::events::{EngineEvent, EventListener};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Fans engine events out to subscribed listeners. Delivery is best-effort
/// and happens strictly after the underlying state change was journaled.
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Arc<dyn EventListener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().await.push(listener);
    }

    pub async fn publish(&self, event: EngineEvent) {
        let listeners = self.listeners.read().await;
        for listener in listeners.iter() {
            listener.on_event(&event);
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.listeners.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        count: Arc<AtomicUsize>,
    }

    impl EventListener for CountingListener {
        fn on_event(&self, _event: &EngineEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn publish_reaches_all_listeners() {
        let bus = EventBus::new();
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Arc::new(CountingListener {
            count: Arc::clone(&count1),
        }))
        .await;
        bus.subscribe(Arc::new(CountingListener {
            count: Arc::clone(&count2),
        }))
        .await;

        bus.publish(EngineEvent::SystemOnline).await;

        assert_eq!(count1.load(Ordering::SeqCst), 1);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clones_share_listeners() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();

        bus1.subscribe(Arc::new(CountingListener {
            count: Arc::new(AtomicUsize::new(0)),
        }))
        .await;

        assert_eq!(bus2.subscriber_count().await, 1);
    }
}
