//! Database queries

use super::{
    format_timestamp, ChannelAnnouncementModel, Database, NodeAddressModel,
    NodeAnnouncementModel, TableCounts,
};
use crate::SyncResult;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use tracing::debug;

const CHANNEL_COLUMNS: &str = "id, short_channel_id, node_id_1, node_id_2, bitcoin_key_1, \
     bitcoin_key_2, extra_opaque_data, json_data, first_seen, last_seen";
const NODE_COLUMNS: &str = "id, node_id, alias, rgb_color, json_data, first_seen, last_seen";
const ADDRESS_COLUMNS: &str = "id, node_id, address, port, first_seen, last_seen";

/// Read-side queries over the synced graph tables.
///
/// The `_seen_since` variants return rows observed strictly after a point in
/// time, for incremental exports.
pub struct GraphQueries<'a> {
    db: &'a Database,
}

impl<'a> GraphQueries<'a> {
    /// Create a new query instance
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// List all channel announcements, oldest first
    pub async fn channel_announcements(&self) -> SyncResult<Vec<ChannelAnnouncementModel>> {
        self.select("channel_announcements", CHANNEL_COLUMNS, None, channel_from_row)
            .await
    }

    /// Channel announcements with `last_seen` after `since`
    pub async fn channel_announcements_seen_since(
        &self,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<ChannelAnnouncementModel>> {
        self.select(
            "channel_announcements",
            CHANNEL_COLUMNS,
            Some(since),
            channel_from_row,
        )
        .await
    }

    /// List all node announcements, oldest first
    pub async fn node_announcements(&self) -> SyncResult<Vec<NodeAnnouncementModel>> {
        self.select("node_announcements", NODE_COLUMNS, None, node_from_row)
            .await
    }

    /// Node announcements with `last_seen` after `since`
    pub async fn node_announcements_seen_since(
        &self,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<NodeAnnouncementModel>> {
        self.select("node_announcements", NODE_COLUMNS, Some(since), node_from_row)
            .await
    }

    /// List all node addresses, oldest first
    pub async fn node_addresses(&self) -> SyncResult<Vec<NodeAddressModel>> {
        self.select("node_addresses", ADDRESS_COLUMNS, None, address_from_row)
            .await
    }

    /// Node addresses with `last_seen` after `since`
    pub async fn node_addresses_seen_since(
        &self,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<NodeAddressModel>> {
        self.select(
            "node_addresses",
            ADDRESS_COLUMNS,
            Some(since),
            address_from_row,
        )
        .await
    }

    /// Row totals of all three tables
    pub async fn counts(&self) -> SyncResult<TableCounts> {
        let conn = self.db.conn().clone();
        let conn = conn.lock().await;

        let counts = TableCounts {
            channels: count_rows(&conn, "channel_announcements")?,
            nodes: count_rows(&conn, "node_announcements")?,
            addresses: count_rows(&conn, "node_addresses")?,
        };
        debug!("DB: Table counts: {:?}", counts);

        Ok(counts)
    }

    async fn select<T>(
        &self,
        table: &str,
        columns: &str,
        since: Option<DateTime<Utc>>,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> SyncResult<Vec<T>> {
        // Timestamps are written fixed-width, so text order is time order.
        let (filter, params) = match since {
            Some(since) => (
                "WHERE last_seen > ?1",
                vec![Value::Text(format_timestamp(since))],
            ),
            None => ("", Vec::new()),
        };
        let sql = format!("SELECT {} FROM {} {} ORDER BY id", columns, table, filter);

        let conn = self.db.conn().clone();
        let conn = conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params), map)?
            .collect::<Result<Vec<_>, _>>()?;

        debug!("DB: Read {} rows from {}", rows.len(), table);
        Ok(rows)
    }
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<ChannelAnnouncementModel> {
    Ok(ChannelAnnouncementModel {
        id: row.get(0)?,
        short_channel_id: row.get::<_, i64>(1)? as u64,
        node_id_1: row.get(2)?,
        node_id_2: row.get(3)?,
        bitcoin_key_1: row.get(4)?,
        bitcoin_key_2: row.get(5)?,
        extra_opaque_data: row.get(6)?,
        json_data: row.get(7)?,
        first_seen: row.get(8)?,
        last_seen: row.get(9)?,
    })
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<NodeAnnouncementModel> {
    Ok(NodeAnnouncementModel {
        id: row.get(0)?,
        node_id: row.get(1)?,
        alias: row.get(2)?,
        rgb_color: row.get(3)?,
        json_data: row.get(4)?,
        first_seen: row.get(5)?,
        last_seen: row.get(6)?,
    })
}

fn address_from_row(row: &Row<'_>) -> rusqlite::Result<NodeAddressModel> {
    Ok(NodeAddressModel {
        id: row.get(0)?,
        node_id: row.get(1)?,
        address: row.get(2)?,
        port: row.get(3)?,
        first_seen: row.get(4)?,
        last_seen: row.get(5)?,
    })
}

fn count_rows(conn: &Connection, table: &str) -> SyncResult<u64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;
    Ok(count.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BatchUpserter, CHANNEL_ANNOUNCEMENTS, NODE_ADDRESSES};
    use crate::transform::{AddressRow, ChannelRow};
    use chrono::TimeZone;

    fn address(i: usize) -> AddressRow {
        AddressRow {
            node_id: format!("02{:064x}", i),
            address: format!("198.51.100.{}", i),
            port: 9735,
        }
    }

    async fn write_addresses(db: &Database, range: std::ops::Range<usize>, at: DateTime<Utc>) {
        let conn = db.conn();
        let conn = conn.lock().await;
        let mut writer = BatchUpserter::new(&conn, NODE_ADDRESSES, 100, at);
        for i in range {
            writer.push(&address(i)).unwrap();
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_empty_tables() {
        let db = Database::connect("sqlite::memory:", false).await.unwrap();
        let queries = GraphQueries::new(&db);

        assert_eq!(queries.counts().await.unwrap(), TableCounts::default());
        assert!(queries.channel_announcements().await.unwrap().is_empty());
        assert!(queries.node_announcements().await.unwrap().is_empty());
        assert!(queries.node_addresses().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reads_inserted_rows() {
        let db = Database::connect("sqlite::memory:", false).await.unwrap();
        {
            let conn = db.conn();
            let conn = conn.lock().await;
            conn.execute(
                "INSERT INTO node_addresses (node_id, address, port, first_seen, last_seen) \
                 VALUES ('02aa', '203.0.113.5', 9735, \
                         '2024-01-01T00:00:00.000000+00:00', '2024-01-02T00:00:00.000000+00:00')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO node_announcements (node_id, alias, rgb_color, json_data) \
                 VALUES ('02aa', 'alice', '#123456', NULL)",
                [],
            )
            .unwrap();
        }

        let queries = GraphQueries::new(&db);
        let addresses = queries.node_addresses().await.unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].port, 9735);
        assert!(addresses[0].last_seen > addresses[0].first_seen);

        let nodes = queries.node_announcements().await.unwrap();
        assert_eq!(nodes[0].alias, "alice");
        assert!(nodes[0].json_data.is_none());

        let counts = queries.counts().await.unwrap();
        assert_eq!(
            counts,
            TableCounts {
                channels: 0,
                nodes: 1,
                addresses: 1
            }
        );
    }

    #[tokio::test]
    async fn test_seen_since_returns_newer_rows() {
        let db = Database::connect("sqlite::memory:", false).await.unwrap();
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();

        write_addresses(&db, 0..5, first).await;
        // Rows 3 and 4 are observed again, 5 is new
        write_addresses(&db, 3..6, second).await;

        let queries = GraphQueries::new(&db);
        let changed = queries.node_addresses_seen_since(first).await.unwrap();
        let changed: Vec<&str> = changed.iter().map(|a| a.address.as_str()).collect();
        assert_eq!(changed, vec!["198.51.100.3", "198.51.100.4", "198.51.100.5"]);

        assert_eq!(queries.node_addresses_seen_since(second).await.unwrap().len(), 0);
        let before = first - chrono::Duration::seconds(1);
        assert_eq!(queries.node_addresses_seen_since(before).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_seen_since_for_channels_and_nodes() {
        let db = Database::connect("sqlite::memory:", false).await.unwrap();
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        {
            let conn = db.conn();
            let conn = conn.lock().await;
            let mut writer = BatchUpserter::new(&conn, CHANNEL_ANNOUNCEMENTS, 10, first);
            writer
                .push(&ChannelRow {
                    short_channel_id: u64::MAX,
                    node_id_1: "02aa".to_string(),
                    node_id_2: "03bb".to_string(),
                    bitcoin_key_1: "02cc".to_string(),
                    bitcoin_key_2: "03dd".to_string(),
                    extra_opaque_data: String::new(),
                    json_data: "{}".to_string(),
                })
                .unwrap();
            writer.finish().unwrap();
            conn.execute(
                "INSERT INTO node_announcements \
                 (node_id, alias, rgb_color, json_data, first_seen, last_seen) \
                 VALUES ('02aa', 'alice', '#123456', '{}', ?1, ?1)",
                [format_timestamp(first)],
            )
            .unwrap();
        }

        let queries = GraphQueries::new(&db);
        let before = first - chrono::Duration::minutes(1);

        let channels = queries.channel_announcements_seen_since(before).await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].short_channel_id, u64::MAX);
        assert!(queries
            .channel_announcements_seen_since(first)
            .await
            .unwrap()
            .is_empty());

        assert_eq!(queries.node_announcements_seen_since(before).await.unwrap().len(), 1);
        assert!(queries
            .node_announcements_seen_since(first)
            .await
            .unwrap()
            .is_empty());
    }
}
