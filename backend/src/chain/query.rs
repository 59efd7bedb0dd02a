//! Single-shot block fetches
//!
//! `block` runs `Query::fetch_block` on its own task and hands back a future
//! that resolves exactly once. Dropping the future abandons the fetch; the
//! task finishes on its own and its result is discarded.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use super::{ChainError, ChainResult, Query};
use crate::types::ChainBlock;

/// Pending result of a spawned block fetch
#[derive(Debug)]
pub struct BlockFetch {
    height: u64,
    rx: oneshot::Receiver<ChainResult<ChainBlock>>,
}

impl BlockFetch {
    pub fn height(&self) -> u64 {
        self.height
    }
}

impl Future for BlockFetch {
    type Output = ChainResult<ChainBlock>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ChainError::Rpc(format!(
                "fetch task for block {} ended without a result",
                this.height
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Spawn a fetch of the block at `height`
pub fn block<Q>(query: Arc<Q>, height: u64) -> BlockFetch
where
    Q: Query + ?Sized + 'static,
{
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let result = query.fetch_block(height).await;
        // Receiver gone means the caller gave up
        let _ = tx.send(result);
    });

    BlockFetch { height, rx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainInfo;
    use async_trait::async_trait;
    use std::time::Duration;

    struct SlowChain {
        delay: Duration,
    }

    #[async_trait]
    impl Query for SlowChain {
        fn chain(&self) -> &str {
            "test"
        }

        async fn ledger(&self) -> ChainResult<ChainInfo> {
            Err(ChainError::Timeout)
        }

        async fn balance(&self, _: &str, _: &str, _: Option<&str>) -> ChainResult<String> {
            Ok("0".to_string())
        }

        async fn fetch_block(&self, height: u64) -> ChainResult<ChainBlock> {
            tokio::time::sleep(self.delay).await;
            if height == 0 {
                return Err(ChainError::BlockNotFound(height));
            }
            Ok(ChainBlock {
                chain: "test".to_string(),
                hash: format!("h{}", height),
                height,
                parent_hash: None,
                txs: vec![],
            })
        }
    }

    #[tokio::test]
    async fn test_fetch_resolves_once() {
        let chain = Arc::new(SlowChain { delay: Duration::from_millis(5) });
        let fetch = block(chain, 42);
        assert_eq!(fetch.height(), 42);

        let block = fetch.await.unwrap();
        assert_eq!(block.hash, "h42");
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let chain = Arc::new(SlowChain { delay: Duration::ZERO });
        assert!(matches!(block(chain, 0).await, Err(ChainError::BlockNotFound(0))));
    }

    #[tokio::test]
    async fn test_timeout_abandons_fetch() {
        let chain = Arc::new(SlowChain { delay: Duration::from_secs(5) });
        let result = tokio::time::timeout(Duration::from_millis(10), block(chain, 7)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_works_through_trait_object() {
        let chain: Arc<dyn Query> = Arc::new(SlowChain { delay: Duration::ZERO });
        assert_eq!(block(chain, 3).await.unwrap().height, 3);
    }
}
