//! Sync cycle
//!
//! One cycle copies the source graph file to its scratch path, opens the copy,
//! and runs three entity passes against the destination database: channels,
//! then nodes, then addresses. Each pass runs in its own transaction.
//!
//! A record that fails validation rolls back only the pass it belongs to; the
//! remaining passes still run and the cycle is reported as failed.
//! Infrastructure failures (copy, open, SQL) abort the whole cycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{
    node_announcements, BatchUpserter, Database, GraphQueries, NodeKey, UpsertStats,
    CHANNEL_ANNOUNCEMENTS, NODE_ADDRESSES,
};
use crate::graph::{open_with_retry, ChannelGraph, SnapshotGraph};
use crate::scratch::ScratchCopy;
use crate::transform::{address_rows, channel_row, node_row};
use crate::{SyncError, SyncResult};

mod scheduler;

pub use scheduler::{Scheduler, SchedulerState};

/// Result of one entity pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityOutcome {
    /// The pass committed
    Synced(UpsertStats),
    /// The pass was rolled back
    Failed(String),
}

impl EntityOutcome {
    /// Whether the pass committed
    pub fn is_success(&self) -> bool {
        matches!(self, EntityOutcome::Synced(_))
    }
}

impl fmt::Display for EntityOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityOutcome::Synced(stats) => {
                write!(f, "{} rows in {} batches", stats.rows, stats.flushes)
            }
            EntityOutcome::Failed(reason) => write!(f, "FAILED ({})", reason),
        }
    }
}

/// Per-entity outcome of a sync cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// `channel_announcements` pass
    pub channels: EntityOutcome,
    /// `node_announcements` pass
    pub nodes: EntityOutcome,
    /// `node_addresses` pass
    pub addresses: EntityOutcome,
}

impl CycleReport {
    /// Whether every pass committed
    pub fn is_success(&self) -> bool {
        self.channels.is_success() && self.nodes.is_success() && self.addresses.is_success()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channels: {}, nodes: {}, addresses: {}",
            self.channels, self.nodes, self.addresses
        )
    }
}

/// Something the scheduler can run once per tick
#[async_trait]
pub trait SyncCycle: Send + Sync {
    /// Run one full cycle
    async fn run_cycle(&self) -> SyncResult<CycleReport>;
}

/// Copies the configured graph snapshot into the destination database
pub struct SyncService {
    config: Arc<Config>,
    db: Arc<Database>,
}

impl SyncService {
    /// Create a service over a connected database
    pub fn new(config: Arc<Config>, db: Arc<Database>) -> Self {
        Self { config, db }
    }

    /// Run the three entity passes over an already opened graph.
    ///
    /// `seen_at` becomes `first_seen` of new rows and `last_seen` of every row
    /// observed.
    pub async fn sync_graph<G>(&self, graph: &G, seen_at: DateTime<Utc>) -> SyncResult<CycleReport>
    where
        G: ChannelGraph + Sync + ?Sized,
    {
        let batch_size = self.config.sync.batch_size;
        let node_key = self.db.node_key();

        let conn = self.db.conn();
        let mut conn = conn.lock().await;

        let channels = entity_outcome(
            "channels",
            sync_channels(&mut conn, graph, batch_size, seen_at),
        )?;
        let nodes = entity_outcome(
            "nodes",
            sync_nodes(&mut conn, graph, node_key, batch_size, seen_at),
        )?;
        let addresses = entity_outcome(
            "addresses",
            sync_addresses(&mut conn, graph, batch_size, seen_at),
        )?;

        Ok(CycleReport {
            channels,
            nodes,
            addresses,
        })
    }
}

#[async_trait]
impl SyncCycle for SyncService {
    async fn run_cycle(&self) -> SyncResult<CycleReport> {
        let source = &self.config.source;
        let seen_at = Utc::now();

        let scratch = ScratchCopy::create(&source.db_path, &source.scratch_path).await?;
        if scratch.is_empty() {
            warn!("Source {} is empty", source.db_path.display());
        }

        let scratch_path = scratch.path();
        let graph = open_with_retry(
            scratch_path,
            source.open_attempts,
            self.config.open_retry_delay(),
            || SnapshotGraph::open(scratch_path),
        )
        .await?;
        info!(
            "Opened graph snapshot: {} channels, {} nodes",
            graph.channel_count(),
            graph.node_count()
        );

        let report = self.sync_graph(&graph, seen_at).await?;

        drop(graph);
        drop(scratch);

        let counts = GraphQueries::new(&self.db).counts().await?;
        info!(
            "DB: channel_announcements={} node_announcements={} node_addresses={}",
            counts.channels, counts.nodes, counts.addresses
        );

        Ok(report)
    }
}

/// Turn a pass result into an outcome; only validation failures are contained
fn entity_outcome(entity: &str, result: SyncResult<UpsertStats>) -> SyncResult<EntityOutcome> {
    match result {
        Ok(stats) => {
            info!(
                "[{}] upserted {} rows in {} batches ({} statements)",
                entity, stats.rows, stats.flushes, stats.statements
            );
            Ok(EntityOutcome::Synced(stats))
        }
        Err(SyncError::Validation(reason)) => {
            error!("[{}] rolled back: {}", entity, reason);
            Ok(EntityOutcome::Failed(reason))
        }
        Err(e) => {
            error!("[{}] aborted: {}", entity, e);
            Err(e)
        }
    }
}

fn sync_channels<G>(
    conn: &mut Connection,
    graph: &G,
    batch_size: usize,
    seen_at: DateTime<Utc>,
) -> SyncResult<UpsertStats>
where
    G: ChannelGraph + ?Sized,
{
    let tx = conn.transaction()?;
    let stats = {
        let mut writer = BatchUpserter::new(&tx, CHANNEL_ANNOUNCEMENTS, batch_size, seen_at);
        graph.for_each_channel(&mut |info, _, _| writer.push(&channel_row(info)?))?;
        writer.finish()?
    };
    tx.commit()?;
    Ok(stats)
}

fn sync_nodes<G>(
    conn: &mut Connection,
    graph: &G,
    node_key: NodeKey,
    batch_size: usize,
    seen_at: DateTime<Utc>,
) -> SyncResult<UpsertStats>
where
    G: ChannelGraph + ?Sized,
{
    let tx = conn.transaction()?;
    let stats = {
        let mut writer =
            BatchUpserter::new(&tx, node_announcements(node_key), batch_size, seen_at);
        graph.for_each_node(&mut |node| writer.push(&node_row(node)?))?;
        writer.finish()?
    };
    tx.commit()?;
    Ok(stats)
}

fn sync_addresses<G>(
    conn: &mut Connection,
    graph: &G,
    batch_size: usize,
    seen_at: DateTime<Utc>,
) -> SyncResult<UpsertStats>
where
    G: ChannelGraph + ?Sized,
{
    let tx = conn.transaction()?;
    let stats = {
        let mut writer = BatchUpserter::new(&tx, NODE_ADDRESSES, batch_size, seen_at);
        graph.for_each_node(&mut |node| {
            for row in address_rows(node) {
                writer.push(&row)?;
            }
            Ok(())
        })?;
        writer.finish()?
    };
    tx.commit()?;
    Ok(stats)
}
