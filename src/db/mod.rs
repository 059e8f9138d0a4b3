//! Database module for lnd-graph-sync
//!
//! This module handles the destination store for:
//! - Channel announcements
//! - Node announcements
//! - Node addresses
//!
//! Every table carries `first_seen` (set on insert only) and `last_seen`
//! (refreshed whenever a sync observes the row again).

use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{SyncError, SyncResult};

mod models;
mod queries;
mod upsert;

pub use models::*;
pub use queries::*;
pub use upsert::*;

/// Natural key used for `node_announcements`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKey {
    /// One row per node public key; alias and color are updated in place
    PubKey,
    /// One row per (public key, alias, color) combination a node has announced
    AliasHistory,
}

impl NodeKey {
    /// Pick the key from the `track_alias_history` setting
    pub fn from_history_flag(track_alias_history: bool) -> Self {
        if track_alias_history {
            NodeKey::AliasHistory
        } else {
            NodeKey::PubKey
        }
    }

    /// Columns of the unique constraint
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            NodeKey::PubKey => &["node_id"],
            NodeKey::AliasHistory => &["node_id", "alias", "rgb_color"],
        }
    }
}

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    /// SQLite connection (wrapped in Arc<Mutex> for thread safety)
    conn: Arc<Mutex<Connection>>,
    /// Natural key of the node table
    node_key: NodeKey,
}

impl Database {
    /// Connect to the database and create the schema if needed
    pub async fn connect(database_url: &str, track_alias_history: bool) -> SyncResult<Self> {
        info!("Connecting to database at {}", database_url);

        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        // Ensure the directory exists for file-based databases
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        SyncError::Config(format!(
                            "cannot create database directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }
        }

        let conn = Connection::open(path)?;
        let node_key = NodeKey::from_history_flag(track_alias_history);

        Self::run_migrations(&conn, node_key)?;

        info!("Database connected successfully");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            node_key,
        })
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection, node_key: NodeKey) -> SyncResult<()> {
        debug!("Running database migrations...");

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS channel_announcements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                short_channel_id INTEGER NOT NULL,
                node_id_1 TEXT NOT NULL,
                node_id_2 TEXT NOT NULL,
                bitcoin_key_1 TEXT NOT NULL,
                bitcoin_key_2 TEXT NOT NULL,
                extra_opaque_data TEXT NOT NULL DEFAULT '',
                json_data TEXT,
                first_seen DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                last_seen DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                CONSTRAINT unique_channel UNIQUE (
                    short_channel_id, node_id_1, node_id_2,
                    bitcoin_key_1, bitcoin_key_2, extra_opaque_data
                )
            );
            CREATE INDEX IF NOT EXISTS idx_channel_node_id_1 ON channel_announcements(node_id_1);
            CREATE INDEX IF NOT EXISTS idx_channel_node_id_2 ON channel_announcements(node_id_2);
            CREATE INDEX IF NOT EXISTS idx_channel_last_seen ON channel_announcements(last_seen);

            CREATE TABLE IF NOT EXISTS node_addresses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id TEXT NOT NULL,
                address TEXT NOT NULL,
                port INTEGER NOT NULL,
                first_seen DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                last_seen DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                CONSTRAINT unique_address UNIQUE (node_id, address, port)
            );
            CREATE INDEX IF NOT EXISTS idx_address_last_seen ON node_addresses(last_seen);
            "#,
        )?;

        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS node_announcements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id TEXT NOT NULL,
                alias TEXT NOT NULL,
                rgb_color TEXT NOT NULL,
                json_data TEXT,
                first_seen DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                last_seen DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                CONSTRAINT unique_node UNIQUE ({})
            );
            CREATE INDEX IF NOT EXISTS idx_node_last_seen ON node_announcements(last_seen);
            "#,
            node_key.columns().join(", ")
        ))?;

        // An existing table may have been created under the other node key.
        let existing = Self::unique_keys(conn, "node_announcements")?;
        let expected: Vec<String> = node_key.columns().iter().map(|c| c.to_string()).collect();
        if !existing.contains(&expected) {
            return Err(SyncError::Config(format!(
                "node_announcements has unique keys {:?} but {:?} is configured; \
                 migrate the table or change track_alias_history",
                existing, expected
            )));
        }

        debug!("Database migrations completed");
        Ok(())
    }

    /// Column lists of every unique index on a table
    fn unique_keys(conn: &Connection, table: &str) -> SyncResult<Vec<Vec<String>>> {
        let mut stmt = conn.prepare(
            r#"SELECT name FROM pragma_index_list(?1) WHERE "unique" = 1 AND origin != 'pk'"#,
        )?;
        let indexes = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut keys = Vec::with_capacity(indexes.len());
        for index in indexes {
            let mut stmt = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
            let columns = stmt
                .query_map([&index], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            keys.push(columns);
        }

        Ok(keys)
    }

    /// Get the database connection
    pub fn conn(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// Natural key of the node table
    pub fn node_key(&self) -> NodeKey {
        self.node_key
    }

    /// Run SQLite's shutdown housekeeping.
    ///
    /// The connection itself is closed when the last handle is dropped.
    pub async fn close(&self) -> SyncResult<()> {
        info!("Optimizing database before shutdown...");
        let conn = self.conn.lock().await;
        conn.execute_batch("PRAGMA optimize;")?;
        info!("Database ready to close");
        Ok(())
    }
}
