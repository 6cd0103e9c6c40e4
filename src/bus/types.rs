use crate::core::types::OperatorAlert;
use crate::optimize::workflow::OptimizeView;
use crate::scheduler::actor::SyncUpdate;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::broadcast;

// ---------- Topic trait (broadcast semantics) ----------
#[async_trait::async_trait]
pub trait Topic<T>: Sync + Send + 'static {
    /// Publish a message to all subscribers.
    async fn publish(&self, msg: T) -> Result<()>;

    /// Subscribe to the stream (each subscriber has an independent cursor).
    fn subscribe(&self) -> broadcast::Receiver<Arc<T>>;
}

// 1->N fanout, lossy under lag. Payloads travel as Arc<T>.
pub struct BroadcastTopic<T: Send + Sync + 'static> {
    tx: broadcast::Sender<Arc<T>>,
}

impl<T: Send + Sync + 'static> BroadcastTopic<T> {
    pub fn with_capacity(cap: usize) -> Self {
        let (tx, _rx) = broadcast::channel(cap);
        Self { tx }
    }
}

#[async_trait]
impl<T: Debug + Send + Sync + 'static> Topic<T> for BroadcastTopic<T> {
    async fn publish(&self, msg: T) -> Result<()> {
        // no subscribers is not an error for a view feed
        let _ = self.tx.send(Arc::new(msg));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<T>> {
        self.tx.subscribe()
    }
}

/// Fan-out from the sync and optimize loops to whatever renders them.
#[derive(Clone)]
pub struct Bus {
    pub updates: Arc<dyn Topic<SyncUpdate>>,
    pub alerts: Arc<dyn Topic<OperatorAlert>>,
    pub optimize: Arc<dyn Topic<OptimizeView>>,
}

impl Bus {
    pub fn new() -> Self {
        let cap = 256;

        Self {
            updates: Arc::new(BroadcastTopic::<SyncUpdate>::with_capacity(cap)),
            alerts: Arc::new(BroadcastTopic::<OperatorAlert>::with_capacity(cap)),
            optimize: Arc::new(BroadcastTopic::<OptimizeView>::with_capacity(cap)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AlertSource;
    use chrono::Utc;

    #[tokio::test]
    async fn test_every_subscriber_sees_each_message() {
        let bus = Bus::new();
        let mut a = bus.alerts.subscribe();
        let mut b = bus.alerts.subscribe();

        let alert = OperatorAlert::new(AlertSource::Optimize, "apply failed", Utc::now());
        bus.alerts.publish(alert.clone()).await.unwrap();

        assert_eq!(*a.recv().await.unwrap(), alert);
        assert_eq!(*b.recv().await.unwrap(), alert);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let topic = BroadcastTopic::<u32>::with_capacity(4);
        assert!(topic.publish(7).await.is_ok());
    }
}
