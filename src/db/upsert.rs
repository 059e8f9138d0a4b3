//! Batched upserts
//!
//! Rows are buffered and written as multi-row
//! `INSERT … ON CONFLICT (natural key) DO UPDATE` statements per chunk. A
//! chunk larger than the connection's bound-parameter limit allows is split
//! over several statements. The cycle timestamp is bound once as `?1` and used
//! for both `first_seen` and `last_seen`; the update clause only ever touches
//! `last_seen` and the table's mutable columns, so `first_seen` keeps its
//! original value.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::limits::Limit;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::fmt::Write as _;
use std::marker::PhantomData;
use tracing::debug;

use super::NodeKey;
use crate::transform::{AddressRow, ChannelRow, NodeRow};
use crate::SyncResult;

/// Rows per batch unless configured otherwise
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Shape of an upsert target
#[derive(Debug, Clone, Copy)]
pub struct UpsertTable {
    /// Table name
    pub name: &'static str,
    /// Data columns, in the order rows push their values
    pub columns: &'static [&'static str],
    /// Natural key the conflict clause targets
    pub conflict: &'static [&'static str],
    /// Columns overwritten when the key already exists
    pub update: &'static [&'static str],
}

/// `channel_announcements`
pub const CHANNEL_ANNOUNCEMENTS: UpsertTable = UpsertTable {
    name: "channel_announcements",
    columns: &[
        "short_channel_id",
        "node_id_1",
        "node_id_2",
        "bitcoin_key_1",
        "bitcoin_key_2",
        "extra_opaque_data",
        "json_data",
    ],
    conflict: &[
        "short_channel_id",
        "node_id_1",
        "node_id_2",
        "bitcoin_key_1",
        "bitcoin_key_2",
        "extra_opaque_data",
    ],
    update: &["json_data"],
};

/// `node_addresses`
pub const NODE_ADDRESSES: UpsertTable = UpsertTable {
    name: "node_addresses",
    columns: &["node_id", "address", "port"],
    conflict: &["node_id", "address", "port"],
    update: &[],
};

const NODE_COLUMNS: &[&str] = &["node_id", "alias", "rgb_color", "json_data"];
const NODE_UPDATE_BY_PUBKEY: &[&str] = &["alias", "rgb_color", "json_data"];
const NODE_UPDATE_BY_HISTORY: &[&str] = &["json_data"];

/// `node_announcements` keyed the way the schema was created
pub fn node_announcements(key: NodeKey) -> UpsertTable {
    let update = match key {
        NodeKey::PubKey => NODE_UPDATE_BY_PUBKEY,
        NodeKey::AliasHistory => NODE_UPDATE_BY_HISTORY,
    };

    UpsertTable {
        name: "node_announcements",
        columns: NODE_COLUMNS,
        conflict: key.columns(),
        update,
    }
}

impl UpsertTable {
    /// Build the statement for `rows` rows
    pub fn statement(&self, rows: usize) -> String {
        let width = self.columns.len();
        let mut sql = format!(
            "INSERT INTO {} ({}, first_seen, last_seen) VALUES ",
            self.name,
            self.columns.join(", ")
        );

        let mut param = 2;
        for row in 0..rows {
            if row > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for _ in 0..width {
                let _ = write!(sql, "?{}, ", param);
                param += 1;
            }
            sql.push_str("?1, ?1)");
        }

        let _ = write!(
            sql,
            " ON CONFLICT ({}) DO UPDATE SET ",
            self.conflict.join(", ")
        );
        for column in self.update {
            let _ = write!(sql, "{column} = excluded.{column}, ");
        }
        sql.push_str("last_seen = excluded.last_seen");

        sql
    }
}

/// A row that can be bound into an upsert statement
pub trait UpsertRow {
    /// Append this row's values in the table's column order
    fn push_values(&self, out: &mut Vec<Value>) -> SyncResult<()>;
}

impl UpsertRow for ChannelRow {
    fn push_values(&self, out: &mut Vec<Value>) -> SyncResult<()> {
        // SQLite integers are signed; the u64 is stored by bit pattern.
        out.extend([
            Value::Integer(self.short_channel_id as i64),
            Value::Text(self.node_id_1.clone()),
            Value::Text(self.node_id_2.clone()),
            Value::Text(self.bitcoin_key_1.clone()),
            Value::Text(self.bitcoin_key_2.clone()),
            Value::Text(self.extra_opaque_data.clone()),
            Value::Text(self.json_data.clone()),
        ]);
        Ok(())
    }
}

impl UpsertRow for NodeRow {
    fn push_values(&self, out: &mut Vec<Value>) -> SyncResult<()> {
        out.extend([
            Value::Text(self.node_id.clone()),
            Value::Text(self.alias.clone()),
            Value::Text(self.rgb_color.clone()),
            Value::Text(self.json_data.clone()),
        ]);
        Ok(())
    }
}

impl UpsertRow for AddressRow {
    fn push_values(&self, out: &mut Vec<Value>) -> SyncResult<()> {
        out.extend([
            Value::Text(self.node_id.clone()),
            Value::Text(self.address.clone()),
            Value::Integer(i64::from(self.port)),
        ]);
        Ok(())
    }
}

/// Outcome of one upsert pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    /// Rows written
    pub rows: usize,
    /// Batches flushed
    pub flushes: usize,
    /// Statements executed; more than `flushes` when a batch had to be split
    pub statements: usize,
}

/// Most rows one statement for `table` can bind on `conn`
pub fn max_rows_per_statement(conn: &Connection, table: &UpsertTable) -> usize {
    // One parameter is the shared timestamp.
    let variables = conn.limit(Limit::SQLITE_LIMIT_VARIABLE_NUMBER).max(2) as usize;
    ((variables - 1) / table.columns.len().max(1)).max(1)
}

/// Render a cycle timestamp the way the tables store it
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Buffers rows and writes them in fixed-size chunks.
///
/// Meant to run inside a transaction: a failed flush leaves earlier chunks
/// uncommitted, and dropping the transaction discards them.
pub struct BatchUpserter<'a, R> {
    conn: &'a Connection,
    table: UpsertTable,
    batch_size: usize,
    statement_rows: usize,
    seen_at: String,
    pending: Vec<Value>,
    pending_rows: usize,
    stats: UpsertStats,
    _rows: PhantomData<fn(&R)>,
}

impl<'a, R: UpsertRow> BatchUpserter<'a, R> {
    /// Create a writer for `table`; a zero batch size is treated as 1
    pub fn new(
        conn: &'a Connection,
        table: UpsertTable,
        batch_size: usize,
        seen_at: DateTime<Utc>,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            conn,
            table,
            batch_size,
            statement_rows: max_rows_per_statement(conn, &table),
            seen_at: format_timestamp(seen_at),
            pending: Vec::with_capacity(batch_size * table.columns.len()),
            pending_rows: 0,
            stats: UpsertStats::default(),
            _rows: PhantomData,
        }
    }

    /// Queue a row, flushing when the batch is full
    pub fn push(&mut self, row: &R) -> SyncResult<()> {
        let before = self.pending.len();
        row.push_values(&mut self.pending)?;
        debug_assert_eq!(self.pending.len() - before, self.table.columns.len());

        self.pending_rows += 1;
        if self.pending_rows >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Write whatever is queued and return the totals
    pub fn finish(mut self) -> SyncResult<UpsertStats> {
        self.flush()?;
        Ok(self.stats)
    }

    fn flush(&mut self) -> SyncResult<()> {
        if self.pending_rows == 0 {
            return Ok(());
        }

        let width = self.table.columns.len();
        let mut remaining = self.pending_rows;
        let mut values = self.pending.drain(..);
        while remaining > 0 {
            let rows = remaining.min(self.statement_rows);
            let sql = self.table.statement(rows);
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let params = std::iter::once(Value::Text(self.seen_at.clone()))
                .chain(values.by_ref().take(rows * width));
            stmt.execute(params_from_iter(params))?;

            remaining -= rows;
            self.stats.statements += 1;
        }
        drop(values);

        self.stats.rows += self.pending_rows;
        self.stats.flushes += 1;
        debug!(
            "Flushed {} rows into {} (batch {})",
            self.pending_rows, self.table.name, self.stats.flushes
        );
        self.pending_rows = 0;

        Ok(())
    }
}
