//! Wallet-side persistence.
//!
//! The adapter itself owns no state; everything durable goes through the
//! [`WalletDai`] data-access seam: the scanned head, the local block cache
//! the reorg rewind reads from, the unscanned journal, the per-address nonce
//! cache, and the account→address book the builder enumerates.

use crate::config::WalletConfig;
use crate::error::{Result, StoreError};
use crate::types::{parse_u64, EthBlock, UnscanRecord};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

pub trait WalletDai: Send + Sync {
    fn get_local_block_head(&self, symbol: &str) -> Result<Option<(u64, String)>>;
    fn save_local_block_head(&self, symbol: &str, height: u64, hash: &str) -> Result<()>;

    fn get_local_block(&self, height: u64) -> Result<Option<EthBlock>>;
    fn save_local_block(&self, block: &EthBlock) -> Result<()>;

    fn save_unscan_record(&self, record: &UnscanRecord) -> Result<()>;
    fn get_unscan_records(&self, symbol: &str) -> Result<Vec<UnscanRecord>>;
    fn delete_unscan_record(&self, height: u64) -> Result<()>;

    /// `None` when the address has never been written (or was reset to 0).
    fn get_address_nonce(&self, address: &str) -> Result<Option<u64>>;
    fn set_address_nonce(&self, address: &str, nonce: u64) -> Result<()>;

    fn get_address_list(&self, account_id: &str) -> Result<Vec<String>>;
    fn add_account_address(&self, account_id: &str, address: &str) -> Result<()>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the store at the configured data directory, creating the
    /// per-symbol subdirectory as needed.
    pub fn open_from_config(config: &WalletConfig) -> Result<Self> {
        let path = config.db_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
        }
        Self::open(&path)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS block_head (
                symbol TEXT PRIMARY KEY,
                height INTEGER NOT NULL,
                hash   TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS local_block (
                height INTEGER PRIMARY KEY,
                body   TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS unscan_record (
                id     INTEGER PRIMARY KEY AUTOINCREMENT,
                height INTEGER NOT NULL,
                tx_id  TEXT NOT NULL DEFAULT '',
                reason TEXT NOT NULL DEFAULT '',
                symbol TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_unscan_height ON unscan_record(height);
            CREATE TABLE IF NOT EXISTS address_nonce (
                address TEXT PRIMARY KEY,
                nonce   INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS account_address (
                account_id TEXT NOT NULL,
                address    TEXT NOT NULL,
                PRIMARY KEY (account_id, address)
            );",
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        f(&conn).map_err(|err| StoreError::Sqlite(err).into())
    }
}

impl WalletDai for SqliteStore {
    fn get_local_block_head(&self, symbol: &str) -> Result<Option<(u64, String)>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT height, hash FROM block_head WHERE symbol = ?1",
                params![symbol],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?)),
            )
            .optional()
        })
    }

    fn save_local_block_head(&self, symbol: &str, height: u64, hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO block_head (symbol, height, hash) VALUES (?1, ?2, ?3)
                 ON CONFLICT(symbol) DO UPDATE SET height = ?2, hash = ?3",
                params![symbol, height as i64, hash],
            )
            .map(|_| ())
        })
    }

    fn get_local_block(&self, height: u64) -> Result<Option<EthBlock>> {
        let body: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT body FROM local_block WHERE height = ?1",
                params![height as i64],
                |row| row.get(0),
            )
            .optional()
        })?;
        match body {
            None => Ok(None),
            Some(raw) => {
                let mut block: EthBlock = serde_json::from_str(&raw).map_err(|err| {
                    StoreError::Corrupt(format!("local block {height}: {err}"))
                })?;
                // Derived fields are not on the wire form; restore them.
                block.header.block_height =
                    parse_u64(&block.header.block_number).unwrap_or(height);
                for tx in &mut block.transactions {
                    tx.block_height = block.header.block_height;
                }
                Ok(Some(block))
            }
        }
    }

    fn save_local_block(&self, block: &EthBlock) -> Result<()> {
        let body = serde_json::to_string(block)
            .map_err(|err| StoreError::Corrupt(format!("block serialize: {err}")))?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO local_block (height, body) VALUES (?1, ?2)
                 ON CONFLICT(height) DO UPDATE SET body = ?2",
                params![block.header.block_height as i64, body],
            )
            .map(|_| ())
        })
    }

    fn save_unscan_record(&self, record: &UnscanRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO unscan_record (height, tx_id, reason, symbol) VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.block_height as i64,
                    record.tx_id,
                    record.reason,
                    record.symbol
                ],
            )
            .map(|_| ())
        })
    }

    fn get_unscan_records(&self, symbol: &str) -> Result<Vec<UnscanRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT height, tx_id, reason, symbol FROM unscan_record
                 WHERE symbol = ?1 ORDER BY height ASC",
            )?;
            let rows = stmt.query_map(params![symbol], |row| {
                Ok(UnscanRecord {
                    block_height: row.get::<_, i64>(0)? as u64,
                    tx_id: row.get(1)?,
                    reason: row.get(2)?,
                    symbol: row.get(3)?,
                })
            })?;
            rows.collect()
        })
    }

    fn delete_unscan_record(&self, height: u64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM unscan_record WHERE height = ?1",
                params![height as i64],
            )
            .map(|_| ())
        })
    }

    fn get_address_nonce(&self, address: &str) -> Result<Option<u64>> {
        let nonce: Option<i64> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT nonce FROM address_nonce WHERE address = ?1",
                params![address.to_ascii_lowercase()],
                |row| row.get(0),
            )
            .optional()
        })?;
        // Zero is the reset marker: the next read must fall through to chain.
        Ok(nonce.map(|n| n as u64).filter(|n| *n > 0))
    }

    fn set_address_nonce(&self, address: &str, nonce: u64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO address_nonce (address, nonce) VALUES (?1, ?2)
                 ON CONFLICT(address) DO UPDATE SET nonce = ?2",
                params![address.to_ascii_lowercase(), nonce as i64],
            )
            .map(|_| ())
        })
    }

    fn get_address_list(&self, account_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT address FROM account_address WHERE account_id = ?1 ORDER BY address ASC",
            )?;
            let rows = stmt.query_map(params![account_id], |row| row.get(0))?;
            rows.collect()
        })
    }

    fn add_account_address(&self, account_id: &str, address: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO account_address (account_id, address) VALUES (?1, ?2)",
                params![account_id, address.to_ascii_lowercase()],
            )
            .map(|_| ())
        })
    }
}
