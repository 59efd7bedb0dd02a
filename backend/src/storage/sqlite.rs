//! SQLite Persistent Storage for the UTXO Ledger
//!
//! Durable ledger state that survives restarts. Connections come from an
//! r2d2 pool; every block is applied inside a single SQLite transaction so a
//! failure midway leaves no partial state behind.
//!
//! At most one non-reorg block may exist per (chain, height). This is enforced
//! by a partial unique index, not only by the ingest logic.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Transaction};
use std::path::Path;

use super::traits::{IngestOutcome, LedgerStore, StorageError, StorageResult};
use crate::types::{
    ChainBlock, LedgerBlock, LedgerStats, OutPointRef, TrackedAddress, UnspentOutput, UtxoState,
};

/// SQLite-backed ledger store with connection pooling
pub struct SqliteLedgerStore {
    pool: Pool<SqliteConnectionManager>,
}

fn db_err(e: rusqlite::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

impl SqliteLedgerStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tracked_addresses (
                address TEXT NOT NULL,
                asset TEXT NOT NULL,
                chain TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (address, asset)
            );

            CREATE INDEX IF NOT EXISTS idx_tracked_chain_address
                ON tracked_addresses(chain, address);

            CREATE TABLE IF NOT EXISTS ledger_blocks (
                hash TEXT NOT NULL,
                height INTEGER NOT NULL,
                chain TEXT NOT NULL,
                reorg INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                UNIQUE (chain, hash)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_blocks_canonical
                ON ledger_blocks(chain, height) WHERE reorg = 0;

            CREATE TABLE IF NOT EXISTS utxos (
                txid TEXT NOT NULL,
                vout INTEGER NOT NULL,
                amount TEXT NOT NULL,
                height INTEGER NOT NULL,
                state TEXT NOT NULL DEFAULT 'original',
                reorg INTEGER NOT NULL DEFAULT 0,
                address TEXT NOT NULL,
                chain TEXT NOT NULL,
                block_hash TEXT NOT NULL,
                spent_block_hash TEXT,
                PRIMARY KEY (txid, vout)
            );

            CREATE INDEX IF NOT EXISTS idx_utxos_owner ON utxos(chain, address, state);
            CREATE INDEX IF NOT EXISTS idx_utxos_block ON utxos(chain, block_hash);
            CREATE INDEX IF NOT EXISTS idx_utxos_spent_block ON utxos(chain, spent_block_hash);
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn row_to_output(row: &rusqlite::Row) -> rusqlite::Result<UnspentOutput> {
        let amount: String = row.get("amount")?;
        let amount = amount.parse::<u128>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let state: UtxoState = row.get::<_, String>("state")?.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
        })?;

        Ok(UnspentOutput {
            txid: row.get("txid")?,
            vout: row.get::<_, i64>("vout")? as u32,
            amount,
            height: row.get::<_, i64>("height")? as u64,
            state,
            reorg: row.get::<_, i64>("reorg")? != 0,
            address: row.get("address")?,
            chain: row.get("chain")?,
            block_hash: row.get("block_hash")?,
            spent_block_hash: row.get("spent_block_hash")?,
        })
    }

    fn row_to_block(row: &rusqlite::Row) -> rusqlite::Result<LedgerBlock> {
        Ok(LedgerBlock {
            hash: row.get("hash")?,
            height: row.get::<_, i64>("height")? as u64,
            chain: row.get("chain")?,
            reorg: row.get::<_, i64>("reorg")? != 0,
        })
    }

    /// Flag a canonical block, the outputs it created, and undo the spends it recorded
    fn invalidate_block(tx: &Transaction<'_>, chain: &str, hash: &str) -> Result<(), StorageError> {
        tx.execute(
            "UPDATE ledger_blocks SET reorg = 1 WHERE chain = ?1 AND hash = ?2",
            params![chain, hash],
        )
        .map_err(db_err)?;

        tx.execute(
            "UPDATE utxos SET reorg = 1 WHERE chain = ?1 AND block_hash = ?2",
            params![chain, hash],
        )
        .map_err(db_err)?;

        tx.execute(
            r#"
            UPDATE utxos SET state = 'selected', spent_block_hash = NULL
            WHERE chain = ?1 AND spent_block_hash = ?2
            "#,
            params![chain, hash],
        )
        .map_err(db_err)?;

        Ok(())
    }

    /// Record a block as canonical and apply its transactions. Returns the
    /// number of outputs inserted, revived or moved onto this block.
    ///
    /// Outputs and spends already attributed to another block are moved onto
    /// this one. The reorg walk descends from the tip, so a transaction
    /// re-mined higher up is applied before its orphaned block is invalidated,
    /// and invalidation only touches rows still pointing at the orphan.
    fn apply_block(tx: &Transaction<'_>, block: &ChainBlock) -> Result<usize, StorageError> {
        tx.execute(
            r#"
            INSERT INTO ledger_blocks (hash, height, chain, reorg, created_at)
            VALUES (?1, ?2, ?3, 0, ?4)
            ON CONFLICT(chain, hash) DO UPDATE SET reorg = 0, height = excluded.height
            "#,
            params![
                block.hash,
                block.height as i64,
                block.chain,
                chrono::Utc::now().timestamp(),
            ],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.extended_code == 2067 {
                    return StorageError::Duplicate(format!(
                        "canonical block at {}:{}",
                        block.chain, block.height
                    ));
                }
            }
            db_err(e)
        })?;

        let mut written = 0;
        for btx in &block.txs {
            for input in &btx.inputs {
                tx.prepare_cached(
                    r#"
                    UPDATE utxos SET state = 'spent', spent_block_hash = ?1
                    WHERE chain = ?2 AND txid = ?3 AND vout = ?4 AND spent_block_hash IS NOT ?1
                    "#,
                )
                .and_then(|mut stmt| {
                    stmt.execute(params![block.hash, block.chain, input.txid, input.vout as i64])
                })
                .map_err(db_err)?;
            }

            for output in &btx.outputs {
                let Some(address) = output.address.as_deref() else {
                    continue;
                };

                let tracked = tx
                    .prepare_cached(
                        "SELECT 1 FROM tracked_addresses WHERE chain = ?1 AND address = ?2 LIMIT 1",
                    )
                    .and_then(|mut stmt| stmt.exists(params![block.chain, address]))
                    .map_err(db_err)?;
                if !tracked {
                    continue;
                }

                written += tx
                    .prepare_cached(
                        r#"
                        INSERT INTO utxos (txid, vout, amount, height, state, reorg, address, chain, block_hash)
                        VALUES (?1, ?2, ?3, ?4, 'original', 0, ?5, ?6, ?7)
                        ON CONFLICT(txid, vout) DO UPDATE SET
                            reorg = 0,
                            height = excluded.height,
                            block_hash = excluded.block_hash
                        WHERE utxos.reorg = 1 OR utxos.block_hash != excluded.block_hash
                        "#,
                    )
                    .and_then(|mut stmt| {
                        stmt.execute(params![
                            btx.txid,
                            output.vout as i64,
                            output.amount.to_string(),
                            block.height as i64,
                            address,
                            block.chain,
                            block.hash,
                        ])
                    })
                    .map_err(db_err)?;
            }
        }

        Ok(written)
    }

    // Synchronous helper methods for the trait implementations

    fn track_address_sync(&self, address: &TrackedAddress) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO tracked_addresses (address, asset, chain, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                address.address,
                address.asset,
                address.chain,
                address.created_at as i64
            ],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.extended_code == 1555 || err.extended_code == 2067 {
                    return StorageError::Duplicate(format!("{}/{}", address.address, address.asset));
                }
            }
            db_err(e)
        })?;

        Ok(())
    }

    fn is_tracked_sync(&self, chain: &str, address: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        conn.prepare_cached("SELECT 1 FROM tracked_addresses WHERE chain = ?1 AND address = ?2 LIMIT 1")
            .and_then(|mut stmt| stmt.exists(params![chain, address]))
            .map_err(db_err)
    }

    fn tracked_addresses_sync(&self, chain: &str) -> Result<Vec<TrackedAddress>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM tracked_addresses WHERE chain = ?1 ORDER BY created_at ASC, address ASC")
            .map_err(db_err)?;

        let records = stmt
            .query_map(params![chain], |row| {
                Ok(TrackedAddress {
                    address: row.get("address")?,
                    asset: row.get("asset")?,
                    chain: row.get("chain")?,
                    created_at: row.get::<_, i64>("created_at")? as u64,
                })
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        Ok(records)
    }

    fn ingest_block_sync(&self, block: &ChainBlock) -> Result<IngestOutcome, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT hash FROM ledger_blocks WHERE chain = ?1 AND height = ?2 AND reorg = 0",
                params![block.chain, block.height as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        let replaced = match existing {
            Some(hash) if hash == block.hash => return Ok(IngestOutcome::Unchanged),
            Some(hash) => {
                Self::invalidate_block(&tx, &block.chain, &hash)?;
                Some(hash)
            }
            None => None,
        };

        let outputs = Self::apply_block(&tx, block)?;
        tx.commit().map_err(db_err)?;

        Ok(match replaced {
            Some(replaced) => IngestOutcome::Reorged { replaced, outputs },
            None => IngestOutcome::Inserted { outputs },
        })
    }

    fn canonical_block_sync(&self, chain: &str, height: u64) -> Result<Option<LedgerBlock>, StorageError> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM ledger_blocks WHERE chain = ?1 AND height = ?2 AND reorg = 0",
            params![chain, height as i64],
            Self::row_to_block,
        )
        .optional()
        .map_err(db_err)
    }

    fn blocks_at_sync(&self, chain: &str, height: u64) -> Result<Vec<LedgerBlock>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM ledger_blocks WHERE chain = ?1 AND height = ?2 ORDER BY rowid ASC")
            .map_err(db_err)?;

        let blocks = stmt
            .query_map(params![chain, height as i64], Self::row_to_block)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        Ok(blocks)
    }

    fn best_height_sync(&self, chain: &str) -> Result<Option<u64>, StorageError> {
        let conn = self.conn()?;

        let height: Option<i64> = conn
            .query_row(
                "SELECT MAX(height) FROM ledger_blocks WHERE chain = ?1 AND reorg = 0",
                params![chain],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        Ok(height.map(|h| h as u64))
    }

    fn spendable_outputs_sync(&self, chain: &str, address: &str) -> Result<Vec<UnspentOutput>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                r#"
            SELECT * FROM utxos
            WHERE chain = ?1 AND address = ?2 AND state = 'original' AND reorg = 0
            ORDER BY height ASC, txid ASC, vout ASC
            "#,
            )
            .map_err(db_err)?;

        let outputs = stmt
            .query_map(params![chain, address], Self::row_to_output)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        Ok(outputs)
    }

    fn output_sync(&self, txid: &str, vout: u32) -> Result<Option<UnspentOutput>, StorageError> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM utxos WHERE txid = ?1 AND vout = ?2",
            params![txid, vout as i64],
            Self::row_to_output,
        )
        .optional()
        .map_err(db_err)
    }

    fn mark_selected_sync(&self, outpoints: &[OutPointRef]) -> Result<usize, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let mut changed = 0;
        for outpoint in outpoints {
            changed += tx
                .execute(
                    "UPDATE utxos SET state = 'selected' WHERE txid = ?1 AND vout = ?2 AND state = 'original'",
                    params![outpoint.txid, outpoint.vout as i64],
                )
                .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)?;
        Ok(changed)
    }

    fn stats_sync(&self, chain: &str) -> Result<LedgerStats, StorageError> {
        let best_height = self.best_height_sync(chain)?;
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<u64, StorageError> {
            conn.query_row(sql, params![chain], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(db_err)
        };

        Ok(LedgerStats {
            best_height,
            blocks: count("SELECT COUNT(*) FROM ledger_blocks WHERE chain = ?1 AND reorg = 0")?,
            reorged_blocks: count("SELECT COUNT(*) FROM ledger_blocks WHERE chain = ?1 AND reorg = 1")?,
            tracked_addresses: count("SELECT COUNT(*) FROM tracked_addresses WHERE chain = ?1")?,
            original: count("SELECT COUNT(*) FROM utxos WHERE chain = ?1 AND reorg = 0 AND state = 'original'")?,
            selected: count("SELECT COUNT(*) FROM utxos WHERE chain = ?1 AND reorg = 0 AND state = 'selected'")?,
            spent: count("SELECT COUNT(*) FROM utxos WHERE chain = ?1 AND reorg = 0 AND state = 'spent'")?,
            reorged_outputs: count("SELECT COUNT(*) FROM utxos WHERE chain = ?1 AND reorg = 1")?,
        })
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn track_address(&self, address: &TrackedAddress) -> StorageResult<()> {
        self.track_address_sync(address)
    }

    async fn is_tracked(&self, chain: &str, address: &str) -> StorageResult<bool> {
        self.is_tracked_sync(chain, address)
    }

    async fn tracked_addresses(&self, chain: &str) -> StorageResult<Vec<TrackedAddress>> {
        self.tracked_addresses_sync(chain)
    }

    async fn ingest_block(&self, block: &ChainBlock) -> StorageResult<IngestOutcome> {
        self.ingest_block_sync(block)
    }

    async fn canonical_block(&self, chain: &str, height: u64) -> StorageResult<Option<LedgerBlock>> {
        self.canonical_block_sync(chain, height)
    }

    async fn blocks_at(&self, chain: &str, height: u64) -> StorageResult<Vec<LedgerBlock>> {
        self.blocks_at_sync(chain, height)
    }

    async fn best_height(&self, chain: &str) -> StorageResult<Option<u64>> {
        self.best_height_sync(chain)
    }

    async fn spendable_outputs(&self, chain: &str, address: &str) -> StorageResult<Vec<UnspentOutput>> {
        self.spendable_outputs_sync(chain, address)
    }

    async fn output(&self, txid: &str, vout: u32) -> StorageResult<Option<UnspentOutput>> {
        self.output_sync(txid, vout)
    }

    async fn mark_selected(&self, outpoints: &[OutPointRef]) -> StorageResult<usize> {
        self.mark_selected_sync(outpoints)
    }

    async fn stats(&self, chain: &str) -> StorageResult<LedgerStats> {
        self.stats_sync(chain)
    }
}
