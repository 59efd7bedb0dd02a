//! In-process block notification exchange
//!
//! Topic-style routing: each named queue is bound to one routing key (the
//! chain tag, or `#` for everything). Publishing awaits queue capacity, so
//! a bound consumer sees every notification published after it bound.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};

use crate::types::ChainBlock;

/// Routing key that matches every chain
pub const WILDCARD: &str = "#";

const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationPayload {
    /// Full block pushed by the notifier
    Block(ChainBlock),
    /// Only the new tip height; the synchronizer fetches the block
    Height { height: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNotification {
    pub chain: String,
    pub payload: NotificationPayload,
}

impl BlockNotification {
    pub fn height(chain: impl Into<String>, height: u64) -> Self {
        Self {
            chain: chain.into(),
            payload: NotificationPayload::Height { height },
        }
    }

    pub fn block(block: ChainBlock) -> Self {
        Self {
            chain: block.chain.clone(),
            payload: NotificationPayload::Block(block),
        }
    }

    pub fn tip_height(&self) -> u64 {
        match &self.payload {
            NotificationPayload::Block(block) => block.height,
            NotificationPayload::Height { height } => *height,
        }
    }
}

struct Binding {
    routing_key: String,
    sender: mpsc::Sender<BlockNotification>,
}

#[derive(Default)]
pub struct BlockBus {
    queues: RwLock<HashMap<String, Binding>>,
}

impl BlockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `queue` bound to `routing_key`; rebinding a name replaces its consumer
    pub async fn bind(&self, queue: &str, routing_key: &str) -> mpsc::Receiver<BlockNotification> {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        self.queues.write().await.insert(
            queue.to_string(),
            Binding {
                routing_key: routing_key.to_string(),
                sender,
            },
        );

        tracing::debug!(target: "custodia::sync", queue, routing_key, "queue bound");
        receiver
    }

    /// Deliver to every queue bound to `routing_key`; returns how many received it
    pub async fn publish(&self, routing_key: &str, notification: BlockNotification) -> usize {
        let targets: Vec<(String, mpsc::Sender<BlockNotification>)> = self
            .queues
            .read()
            .await
            .iter()
            .filter(|(_, b)| b.routing_key == routing_key || b.routing_key == WILDCARD)
            .map(|(name, b)| (name.clone(), b.sender.clone()))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (name, sender) in targets {
            match sender.send(notification.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => closed.push(name),
            }
        }

        if !closed.is_empty() {
            let mut queues = self.queues.write().await;
            for name in closed {
                // Only drop the binding if nobody rebound the name meanwhile
                if queues.get(&name).map_or(false, |b| b.sender.is_closed()) {
                    queues.remove(&name);
                    tracing::debug!(target: "custodia::sync", queue = %name, "dropped closed queue");
                }
            }
        }

        delivered
    }

    pub async fn queue_count(&self) -> usize {
        self.queues.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_routing_by_chain() {
        let bus = BlockBus::new();
        let mut btc = bus.bind("ledger.btc", "btc").await;
        let mut eth = bus.bind("ledger.eth", "eth").await;

        assert_eq!(bus.publish("btc", BlockNotification::height("btc", 7)).await, 1);

        assert_eq!(btc.recv().await.unwrap().tip_height(), 7);
        assert!(eth.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wildcard_and_fanout() {
        let bus = BlockBus::new();
        let mut audit = bus.bind("audit", WILDCARD).await;
        let mut btc = bus.bind("ledger.btc", "btc").await;

        assert_eq!(bus.publish("btc", BlockNotification::height("btc", 1)).await, 2);
        assert_eq!(bus.publish("trx", BlockNotification::height("trx", 2)).await, 1);

        assert_eq!(audit.recv().await.unwrap().chain, "btc");
        assert_eq!(audit.recv().await.unwrap().chain, "trx");
        assert_eq!(btc.recv().await.unwrap().tip_height(), 1);
    }

    #[tokio::test]
    async fn test_closed_queue_dropped() {
        let bus = BlockBus::new();
        let rx = bus.bind("ledger.btc", "btc").await;
        drop(rx);

        assert_eq!(bus.publish("btc", BlockNotification::height("btc", 1)).await, 0);
        assert_eq!(bus.queue_count().await, 0);
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let bus = BlockBus::new();
        let mut rx = bus.bind("ledger.btc", "btc").await;
        for h in 1..=5 {
            bus.publish("btc", BlockNotification::height("btc", h)).await;
        }
        for h in 1..=5 {
            assert_eq!(rx.recv().await.unwrap().tip_height(), h);
        }
    }

    #[test]
    fn test_payload_json() {
        let height: NotificationPayload = serde_json::from_str(r#"{"height": 42}"#).unwrap();
        assert_eq!(height, NotificationPayload::Height { height: 42 });

        let block: NotificationPayload =
            serde_json::from_str(r#"{"chain": "btc", "hash": "h", "height": 3}"#).unwrap();
        assert!(matches!(block, NotificationPayload::Block(b) if b.height == 3 && b.txs.is_empty()));
    }
}
