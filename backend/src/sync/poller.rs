//! Tip poller for chains without a push notifier
//!
//! Polls `Query::ledger` and publishes a height notification on the bus
//! whenever the tip moves.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::bus::{BlockBus, BlockNotification};
use crate::chain::Query;

pub fn spawn_tip_poller<Q>(query: Arc<Q>, bus: Arc<BlockBus>, every: Duration) -> JoinHandle<()>
where
    Q: Query + ?Sized + 'static,
{
    tokio::spawn(async move {
        let chain = query.chain().to_string();
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tip: Option<u64> = None;

        loop {
            ticker.tick().await;

            match query.ledger().await {
                Ok(info) if last_tip != Some(info.height) => {
                    last_tip = Some(info.height);
                    let delivered = bus
                        .publish(&chain, BlockNotification::height(chain.clone(), info.height))
                        .await;
                    tracing::debug!(
                        target: "custodia::sync",
                        chain = %chain,
                        height = info.height,
                        delivered,
                        "tip moved"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(target: "custodia::sync", chain = %chain, error = %e, "tip poll failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainInfo, ChainResult};
    use crate::types::ChainBlock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Ticking {
        height: AtomicU64,
    }

    #[async_trait]
    impl Query for Ticking {
        fn chain(&self) -> &str {
            "btc"
        }

        async fn ledger(&self) -> ChainResult<ChainInfo> {
            Ok(ChainInfo {
                chain: "btc".to_string(),
                height: self.height.load(Ordering::SeqCst),
                best_hash: String::new(),
            })
        }

        async fn balance(&self, _: &str, _: &str, _: Option<&str>) -> ChainResult<String> {
            Ok("0".to_string())
        }

        async fn fetch_block(&self, height: u64) -> ChainResult<ChainBlock> {
            Err(crate::chain::ChainError::BlockNotFound(height))
        }
    }

    #[tokio::test]
    async fn test_publishes_only_on_change() {
        let chain = Arc::new(Ticking {
            height: AtomicU64::new(100),
        });
        let bus = Arc::new(BlockBus::new());
        let mut rx = bus.bind("ledger.btc", "btc").await;

        let handle = spawn_tip_poller(chain.clone(), bus.clone(), Duration::from_millis(10));

        assert_eq!(rx.recv().await.unwrap().tip_height(), 100);
        chain.height.store(101, Ordering::SeqCst);
        assert_eq!(rx.recv().await.unwrap().tip_height(), 101);

        handle.abort();
    }
}
