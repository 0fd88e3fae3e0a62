//! SQLite-backed transaction store
//!
//! Transactions are kept as JSON documents in `chain_tx`, with one row per
//! packet-carrying message in `chain_tx_msg` so lookups by packet id and by
//! message type + height stay on an index. Queries run on the blocking pool,
//! so a caller's timeout can fire while one is waiting on the connection.

use super::{TxPosition, TxStore};
use crate::error::IndexerResult;
use crate::model::{ChainTx, MsgType};
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chain_tx (
    chain_id TEXT NOT NULL,
    tx_hash  TEXT NOT NULL,
    height   INTEGER NOT NULL,
    time     INTEGER NOT NULL,
    code     INTEGER NOT NULL,
    body     TEXT NOT NULL,
    PRIMARY KEY (chain_id, tx_hash)
);
CREATE TABLE IF NOT EXISTS chain_tx_msg (
    chain_id  TEXT NOT NULL,
    tx_hash   TEXT NOT NULL,
    msg_index INTEGER NOT NULL,
    msg_type  TEXT NOT NULL,
    packet_id TEXT NOT NULL,
    height    INTEGER NOT NULL,
    PRIMARY KEY (chain_id, tx_hash, msg_index)
);
CREATE INDEX IF NOT EXISTS idx_chain_tx_msg_packet ON chain_tx_msg (chain_id, packet_id, msg_type);
CREATE INDEX IF NOT EXISTS idx_chain_tx_msg_type_height ON chain_tx_msg (chain_id, msg_type, height);
CREATE INDEX IF NOT EXISTS idx_chain_tx_height_hash ON chain_tx (chain_id, height, tx_hash);
";

pub struct SqliteTxStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTxStore {
    pub fn open(db_path: impl AsRef<Path>) -> IndexerResult<Self> {
        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        Self::init(conn)
    }

    pub fn in_memory() -> IndexerResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> IndexerResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Store a decoded transaction; re-inserting the same hash replaces it
    pub fn insert_tx(&self, tx: &ChainTx) -> IndexerResult<()> {
        let body = serde_json::to_string(tx)?;
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let db_tx = conn.transaction()?;

        db_tx.execute(
            "INSERT OR REPLACE INTO chain_tx (chain_id, tx_hash, height, time, code, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![tx.chain_id, tx.tx_hash, tx.height, tx.time, tx.code, body],
        )?;
        db_tx.execute(
            "DELETE FROM chain_tx_msg WHERE chain_id = ?1 AND tx_hash = ?2",
            params![tx.chain_id, tx.tx_hash],
        )?;
        for (idx, msg) in tx.msgs.iter().enumerate() {
            let (Some(msg_type), Some(packet_id)) = (msg.msg_type(), msg.packet_id()) else {
                continue;
            };
            db_tx.execute(
                "INSERT INTO chain_tx_msg (chain_id, tx_hash, msg_index, msg_type, packet_id, height)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![tx.chain_id, tx.tx_hash, idx as i64, msg_type.as_str(), packet_id, tx.height],
            )?;
        }

        db_tx.commit()?;
        Ok(())
    }

    /// Run `job` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, job: F) -> IndexerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> IndexerResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            job(&conn)
        })
        .await?
    }
}

fn query_bodies(conn: &Connection, sql: &str, args: &[&dyn ToSql]) -> IndexerResult<Vec<ChainTx>> {
    let mut stmt = conn.prepare(sql)?;
    let bodies = stmt
        .query_map(args, |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    bodies
        .iter()
        .map(|b| serde_json::from_str(b).map_err(Into::into))
        .collect()
}

#[async_trait]
impl TxStore for SqliteTxStore {
    async fn txs_by_packet(
        &self,
        chain: &str,
        msg_type: MsgType,
        packet_id: &str,
    ) -> IndexerResult<Vec<ChainTx>> {
        let (chain, packet_id) = (chain.to_string(), packet_id.to_string());
        self.with_conn(move |conn| {
            query_bodies(
                conn,
                "SELECT t.body FROM chain_tx t
                 WHERE t.chain_id = ?1 AND t.tx_hash IN (
                     SELECT m.tx_hash FROM chain_tx_msg m
                     WHERE m.chain_id = ?1 AND m.packet_id = ?2 AND m.msg_type = ?3)
                 ORDER BY t.height DESC",
                &[&chain, &packet_id, &msg_type.as_str()],
            )
        })
        .await
    }

    async fn tx_by_hash(&self, chain: &str, hash: &str) -> IndexerResult<Option<ChainTx>> {
        let (chain, hash) = (chain.to_string(), hash.to_string());
        let body: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT body FROM chain_tx WHERE chain_id = ?1 AND tx_hash = ?2",
                    params![chain, hash],
                    |row| row.get(0),
                )
                .optional()
                .map_err(Into::into)
            })
            .await?;
        match body {
            Some(b) => Ok(Some(serde_json::from_str(&b)?)),
            None => Ok(None),
        }
    }

    async fn txs_by_type_after(
        &self,
        chain: &str,
        msg_type: MsgType,
        after: &TxPosition,
        limit: usize,
    ) -> IndexerResult<Vec<ChainTx>> {
        let (chain, after) = (chain.to_string(), after.clone());
        self.with_conn(move |conn| {
            query_bodies(
                conn,
                "SELECT t.body FROM chain_tx t
                 WHERE t.chain_id = ?1
                   AND (t.height > ?3 OR (t.height = ?3 AND t.tx_hash > ?4))
                   AND t.tx_hash IN (
                     SELECT m.tx_hash FROM chain_tx_msg m
                     WHERE m.chain_id = ?1 AND m.msg_type = ?2 AND m.height >= ?3)
                 ORDER BY t.height ASC, t.tx_hash ASC
                 LIMIT ?5",
                &[&chain, &msg_type.as_str(), &after.height, &after.tx_hash, &(limit as i64)],
            )
        })
        .await
    }
}
