//! Reorg-aware ledger synchronizer
//!
//! For each notification the synchronizer applies every height from its best
//! height + 1 up to the notified tip, in order. Applying a height ingests the
//! block and, unless it came back `Unchanged`, walks backward over at most
//! `confirmation_depth` stored heights, re-ingesting each until one comes
//! back `Unchanged`. Height N's walk finishes before N + 1 is ingested, so a
//! fork below a skipped height is still found.
//!
//! Every ingest is a single store transaction, so a failure at any step
//! leaves the ledger as it was before that block.

use std::sync::Arc;
use tokio::sync::mpsc;

use super::bus::{BlockNotification, NotificationPayload};
use super::{SyncError, SyncResult};
use crate::chain::{query, Query};
use crate::common::config::SyncConfig;
use crate::common::logging::log_ledger_event;
use crate::storage::{IngestOutcome, LedgerStore};
use crate::types::ChainBlock;

pub struct LedgerSynchronizer<Q: Query + ?Sized> {
    chain: String,
    query: Arc<Q>,
    store: Arc<dyn LedgerStore>,
    config: SyncConfig,
    best_height: Option<u64>,
}

impl<Q: Query + ?Sized + 'static> LedgerSynchronizer<Q> {
    pub fn new(query: Arc<Q>, store: Arc<dyn LedgerStore>, config: SyncConfig) -> Self {
        Self {
            chain: query.chain().to_string(),
            query,
            store,
            config,
            best_height: None,
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Highest height ingested by this synchronizer or found in the store
    pub fn best_height(&self) -> Option<u64> {
        self.best_height
    }

    /// Bootstrap, then process notifications until the queue closes
    pub async fn run(mut self, mut queue: mpsc::Receiver<BlockNotification>) {
        match self.bootstrap().await {
            Ok(count) => tracing::info!(
                target: "custodia::sync",
                chain = %self.chain,
                blocks = count,
                best_height = ?self.best_height,
                "ledger bootstrapped"
            ),
            Err(e) => tracing::error!(
                target: "custodia::sync",
                chain = %self.chain,
                error = %e,
                "bootstrap failed, continuing with notifications"
            ),
        }

        while let Some(notification) = queue.recv().await {
            let height = notification.tip_height();
            if let Err(e) = self.handle(notification).await {
                // No immediate retry: the next notification covers this height again
                tracing::warn!(
                    target: "custodia::sync",
                    chain = %self.chain,
                    height,
                    retryable = e.is_retryable(),
                    error = %e,
                    "notification failed"
                );
            }
        }

        tracing::info!(target: "custodia::sync", chain = %self.chain, "notification queue closed");
    }

    /// Walk forward from the stored best height (or `tip - bootstrap_depth`
    /// on an empty ledger) to the node's tip. Returns blocks ingested.
    pub async fn bootstrap(&mut self) -> SyncResult<u64> {
        let tip = self.query.ledger().await?.height;
        let stored = self.store.best_height(&self.chain).await?;
        self.best_height = stored;

        let start = match stored {
            Some(best) => best + 1,
            None => tip.saturating_sub(self.config.bootstrap_depth),
        };

        let mut count = 0;
        for height in start..tip {
            let block = self.fetch(height).await?;
            self.apply(&block).await?;
            count += 1;
        }

        // The tip goes through the normal path so a reorg while offline is repaired
        self.handle(BlockNotification::height(self.chain.clone(), tip)).await?;
        Ok(count + 1)
    }

    /// Process one notification
    pub async fn handle(&mut self, notification: BlockNotification) -> SyncResult<()> {
        if notification.chain != self.chain {
            return Err(SyncError::ChainMismatch {
                expected: self.chain.clone(),
                got: notification.chain,
            });
        }

        let tip_block = match notification.payload {
            NotificationPayload::Block(block) => block,
            NotificationPayload::Height { height } => self.fetch(height).await?,
        };
        let tip = tip_block.height;

        if let Some(best) = self.best_height {
            for height in (best + 1)..tip {
                let block = self.fetch(height).await?;
                self.apply(&block).await?;
            }
        }

        self.apply(&tip_block).await
    }

    /// Ingest `block`, then repair any fork below it
    ///
    /// The walk stops at the first `Unchanged` block, at a height the ledger
    /// never stored, or after `confirmation_depth` heights.
    async fn apply(&mut self, block: &ChainBlock) -> SyncResult<()> {
        if self.ingest(block).await?.is_unchanged() {
            return Ok(());
        }

        let floor = block.height.saturating_sub(self.config.confirmation_depth);
        let mut height = block.height;
        while height > floor {
            height -= 1;
            if self.store.canonical_block(&self.chain, height).await?.is_none() {
                break;
            }
            let parent = self.fetch(height).await?;
            if self.ingest(&parent).await?.is_unchanged() {
                break;
            }
        }

        Ok(())
    }

    async fn fetch(&self, height: u64) -> SyncResult<ChainBlock> {
        let fetch = query::block(self.query.clone(), height);
        let block = tokio::time::timeout(self.config.fetch_timeout, fetch)
            .await
            .map_err(|_| SyncError::FetchTimeout(height))??;

        if block.chain != self.chain {
            return Err(SyncError::ChainMismatch {
                expected: self.chain.clone(),
                got: block.chain,
            });
        }
        Ok(block)
    }

    async fn ingest(&mut self, block: &ChainBlock) -> SyncResult<IngestOutcome> {
        let outcome = self.store.ingest_block(block).await?;

        match &outcome {
            IngestOutcome::Inserted { outputs } => {
                tracing::debug!(
                    target: "custodia::sync",
                    chain = %self.chain,
                    height = block.height,
                    outputs,
                    "block ingested"
                );
                log_ledger_event("block_ingested", &self.chain, block.height, &block.hash, false);
            }
            IngestOutcome::Reorged { replaced, outputs } => {
                tracing::warn!(
                    target: "custodia::sync",
                    chain = %self.chain,
                    height = block.height,
                    replaced = %replaced,
                    outputs,
                    "reorg repaired"
                );
                log_ledger_event("block_reorged", &self.chain, block.height, &block.hash, true);
            }
            IngestOutcome::Unchanged => {}
        }

        self.best_height = Some(self.best_height.map_or(block.height, |b| b.max(block.height)));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainError, ChainInfo, ChainResult};
    use crate::storage::SqliteLedgerStore;
    use crate::types::{BlockOutput, BlockTx, TrackedAddress, UtxoState};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const ADDR: &str = "mzBc4XEFSdzCDcTxAgf6EZXgsZWpztRhef";

    /// Chain whose blocks can be swapped out to simulate reorgs
    struct FakeChain {
        blocks: Mutex<HashMap<u64, ChainBlock>>,
        tip: Mutex<u64>,
        fetches: AtomicUsize,
        slow_height: Option<u64>,
    }

    impl FakeChain {
        fn new(tip: u64, fork: &str) -> Self {
            let chain = Self {
                blocks: Mutex::new(HashMap::new()),
                tip: Mutex::new(0),
                fetches: AtomicUsize::new(0),
                slow_height: None,
            };
            chain.extend(1, tip, fork);
            chain
        }

        /// Replace heights `from..=to` with blocks from `fork` and move the tip
        fn extend(&self, from: u64, to: u64, fork: &str) {
            let mut blocks = self.blocks.lock().unwrap();
            for h in from..=to {
                blocks.insert(h, block(h, fork));
            }
            *self.tip.lock().unwrap() = to;
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    fn block(height: u64, fork: &str) -> ChainBlock {
        ChainBlock {
            chain: "btc".to_string(),
            hash: format!("{}-{}", fork, height),
            height,
            parent_hash: Some(format!("{}-{}", fork, height.saturating_sub(1))),
            txs: vec![BlockTx {
                txid: format!("{}-tx-{}", fork, height),
                inputs: vec![],
                outputs: vec![BlockOutput {
                    vout: 0,
                    address: Some(ADDR.to_string()),
                    amount: 1_000 * height as u128,
                }],
            }],
        }
    }

    #[async_trait]
    impl Query for FakeChain {
        fn chain(&self) -> &str {
            "btc"
        }

        async fn ledger(&self) -> ChainResult<ChainInfo> {
            let height = *self.tip.lock().unwrap();
            Ok(ChainInfo {
                chain: "btc".to_string(),
                height,
                best_hash: self.blocks.lock().unwrap()[&height].hash.clone(),
            })
        }

        async fn balance(&self, _: &str, _: &str, _: Option<&str>) -> ChainResult<String> {
            Ok("0".to_string())
        }

        async fn fetch_block(&self, height: u64) -> ChainResult<ChainBlock> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.slow_height == Some(height) {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            self.blocks
                .lock()
                .unwrap()
                .get(&height)
                .cloned()
                .ok_or(ChainError::BlockNotFound(height))
        }
    }

    fn config() -> SyncConfig {
        SyncConfig {
            confirmation_depth: 6,
            bootstrap_depth: 6,
            fetch_timeout: Duration::from_millis(100),
            poll_interval: None,
        }
    }

    async fn setup(chain: FakeChain) -> (Arc<FakeChain>, Arc<SqliteLedgerStore>, LedgerSynchronizer<FakeChain>) {
        let chain = Arc::new(chain);
        let store = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        store
            .track_address(&TrackedAddress::new(ADDR, "BTC", "btc"))
            .await
            .unwrap();
        let sync = LedgerSynchronizer::new(chain.clone(), store.clone(), config());
        (chain, store, sync)
    }

    #[tokio::test]
    async fn test_bootstrap_empty_ledger() {
        let (_, store, mut sync) = setup(FakeChain::new(20, "a")).await;

        assert_eq!(sync.bootstrap().await.unwrap(), 7);
        assert_eq!(sync.best_height(), Some(20));
        assert!(store.canonical_block("btc", 13).await.unwrap().is_none());
        for h in 14..=20 {
            assert_eq!(store.canonical_block("btc", h).await.unwrap().unwrap().hash, format!("a-{}", h));
        }
        assert_eq!(store.spendable_outputs("btc", ADDR).await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_bootstrap_resumes_from_store() {
        let (chain, store, mut sync) = setup(FakeChain::new(10, "a")).await;
        sync.bootstrap().await.unwrap();

        chain.extend(11, 15, "a");
        let mut resumed = LedgerSynchronizer::new(chain.clone(), store.clone() as Arc<dyn LedgerStore>, config());
        resumed.bootstrap().await.unwrap();

        assert_eq!(resumed.best_height(), Some(15));
        for h in 4..=15 {
            assert!(store.canonical_block("btc", h).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_new_tip_and_gap_fill() {
        let (chain, store, mut sync) = setup(FakeChain::new(10, "a")).await;
        sync.bootstrap().await.unwrap();

        chain.extend(11, 14, "a");
        sync.handle(BlockNotification::height("btc", 14)).await.unwrap();

        for h in 11..=14 {
            assert_eq!(store.canonical_block("btc", h).await.unwrap().unwrap().hash, format!("a-{}", h));
        }
        assert_eq!(sync.best_height(), Some(14));
    }

    #[tokio::test]
    async fn test_reorg_repaired_by_backward_walk() {
        let (chain, store, mut sync) = setup(FakeChain::new(10, "a")).await;
        sync.bootstrap().await.unwrap();

        // Heights 8..=10 replaced, new tip 11
        chain.extend(8, 11, "b");
        sync.handle(BlockNotification::height("btc", 11)).await.unwrap();

        for h in 8..=11 {
            assert_eq!(store.canonical_block("btc", h).await.unwrap().unwrap().hash, format!("b-{}", h));
        }
        assert_eq!(store.canonical_block("btc", 7).await.unwrap().unwrap().hash, "a-7");

        let at_9 = store.blocks_at("btc", 9).await.unwrap();
        assert_eq!(at_9.len(), 2);
        assert_eq!(at_9.iter().filter(|b| !b.reorg).count(), 1);

        let orphaned = store.output("a-tx-9", 0).await.unwrap().unwrap();
        assert!(orphaned.reorg);
        let spendable = store.spendable_outputs("btc", ADDR).await.unwrap();
        assert!(spendable.iter().all(|u| !u.txid.starts_with("a-tx-8") && !u.txid.starts_with("a-tx-9")));
        assert!(spendable.iter().any(|u| u.txid == "b-tx-9" && u.state == UtxoState::Original));
    }

    #[tokio::test]
    async fn test_reorg_below_skipped_height_repaired() {
        let (chain, store, mut sync) = setup(FakeChain::new(10, "a")).await;
        sync.bootstrap().await.unwrap();

        // Height 10 replaced and two blocks mined before the next notification
        chain.extend(10, 12, "b");
        sync.handle(BlockNotification::height("btc", 12)).await.unwrap();

        for h in 10..=12 {
            assert_eq!(store.canonical_block("btc", h).await.unwrap().unwrap().hash, format!("b-{}", h));
        }
        assert_eq!(store.canonical_block("btc", 9).await.unwrap().unwrap().hash, "a-9");
        assert!(store.output("a-tx-10", 0).await.unwrap().unwrap().reorg);

        let spendable = store.spendable_outputs("btc", ADDR).await.unwrap();
        assert!(spendable.iter().any(|u| u.txid == "b-tx-10"));
        assert!(spendable.iter().all(|u| u.txid != "a-tx-10"));
    }

    #[tokio::test]
    async fn test_reorg_while_offline_repaired_on_bootstrap() {
        let (chain, store, mut sync) = setup(FakeChain::new(10, "a")).await;
        sync.bootstrap().await.unwrap();
        drop(sync);

        chain.extend(9, 13, "b");
        let mut restarted = LedgerSynchronizer::new(chain.clone(), store.clone() as Arc<dyn LedgerStore>, config());
        restarted.bootstrap().await.unwrap();

        for h in 9..=13 {
            assert_eq!(store.canonical_block("btc", h).await.unwrap().unwrap().hash, format!("b-{}", h));
        }
        assert_eq!(store.canonical_block("btc", 8).await.unwrap().unwrap().hash, "a-8");
        assert_eq!(store.stats("btc").await.unwrap().reorged_blocks, 2);
    }

    #[tokio::test]
    async fn test_repeated_notification_is_idempotent() {
        let (chain, store, mut sync) = setup(FakeChain::new(10, "a")).await;
        sync.bootstrap().await.unwrap();
        let before = store.stats("btc").await.unwrap();

        let fetches = chain.fetches();
        sync.handle(BlockNotification::height("btc", 10)).await.unwrap();
        // Only the tip is fetched; no backward walk after Unchanged
        assert_eq!(chain.fetches(), fetches + 1);
        assert_eq!(store.stats("btc").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_pushed_block_payload() {
        let (chain, store, mut sync) = setup(FakeChain::new(10, "a")).await;
        sync.bootstrap().await.unwrap();

        chain.extend(11, 11, "a");
        let fetches = chain.fetches();
        sync.handle(BlockNotification::block(block(11, "a"))).await.unwrap();

        assert!(store.canonical_block("btc", 11).await.unwrap().is_some());
        // Pushed tip is not re-fetched; one fetch for the walk to 10
        assert_eq!(chain.fetches(), fetches + 1);
    }

    #[tokio::test]
    async fn test_fetch_timeout_leaves_ledger_untouched() {
        let mut fake = FakeChain::new(10, "a");
        fake.slow_height = Some(11);
        let (chain, store, mut sync) = setup(fake).await;
        sync.bootstrap().await.unwrap();
        let before = store.stats("btc").await.unwrap();

        chain.extend(11, 11, "a");
        let err = sync.handle(BlockNotification::height("btc", 11)).await.unwrap_err();
        assert!(matches!(err, SyncError::FetchTimeout(11)));
        assert!(err.is_retryable());
        assert_eq!(store.stats("btc").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_wrong_chain_rejected() {
        let (_, _, mut sync) = setup(FakeChain::new(3, "a")).await;
        let err = sync.handle(BlockNotification::height("eth", 3)).await.unwrap_err();
        assert!(matches!(err, SyncError::ChainMismatch { .. }));
    }

    #[tokio::test]
    async fn test_run_consumes_queue() {
        let (chain, store, sync) = setup(FakeChain::new(5, "a")).await;
        let (tx, rx) = mpsc::channel(8);

        chain.extend(6, 7, "a");
        tx.send(BlockNotification::height("btc", 7)).await.unwrap();
        drop(tx);

        sync.run(rx).await;
        assert_eq!(store.best_height("btc").await.unwrap(), Some(7));
    }
}
