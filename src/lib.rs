//! lnd-graph-sync: mirrors the Lightning Network channel graph into SQL
//!
//! This crate runs a scheduled extract-transform-load job over a channel graph
//! snapshot taken from a Lightning node:
//!
//! - **Snapshot copy**: the live graph file is copied to a scratch path so the
//!   node's writer never contends with our reads
//! - **Graph traversal**: the copy is opened through the [`graph::ChannelGraph`]
//!   capability, which only exposes "for each channel" and "for each node"
//! - **Transform**: raw records become normalized rows with hex keys, readable
//!   short channel ids and parsed host/port pairs
//! - **Batch upsert**: rows are written in fixed-size multi-row upserts, one
//!   transaction per entity type, keeping `first_seen` stable and refreshing
//!   `last_seen`
//!
//! # Architecture
//!
//! [`GraphSyncApp`] owns the configuration and the database handle and drives a
//! [`sync::Scheduler`], which runs one [`sync::SyncService`] cycle immediately
//! and then one per interval until shutdown is signalled.
//!
#![warn(missing_docs)]

pub mod config;
pub mod db;
pub mod graph;
pub mod scratch;
pub mod sync;
pub mod transform;

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub use config::Config;
use db::Database;
use sync::{Scheduler, SyncService};

/// The main application state
#[derive(Clone)]
pub struct GraphSyncApp {
    /// Application configuration
    pub config: Arc<Config>,
    /// Destination database
    pub db: Arc<Database>,
}

impl GraphSyncApp {
    /// Create a new application instance, connecting to the destination database
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing lnd-graph-sync...");

        let config = Arc::new(config);

        info!("Connecting to database at: {}", config.database.url);
        let db = Database::connect(&config.database.url, config.sync.track_alias_history).await?;
        let db = Arc::new(db);
        info!("Database connected successfully");

        Ok(Self { config, db })
    }

    /// Run the sync scheduler until the shutdown signal fires
    pub async fn run_with_shutdown(
        &self,
        shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<()> {
        let service = SyncService::new(self.config.clone(), self.db.clone());
        let scheduler = Scheduler::new(service, self.config.sync_interval());

        info!(
            "Syncing {} every {:?}",
            self.config.source.db_path.display(),
            self.config.sync_interval()
        );

        let cycles = scheduler.run(shutdown_rx).await;
        info!("Scheduler stopped after {} sync cycles", cycles);

        Ok(())
    }

    /// Shutdown the application gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down lnd-graph-sync...");
        if let Err(e) = self.db.close().await {
            warn!("Error during database shutdown: {}", e);
        }
    }
}

/// Fire `shutdown_tx` once `signal` resolves.
///
/// If listening for the signal fails the sender is held forever, so the
/// scheduler keeps running instead of treating the failure as a shutdown.
pub async fn forward_shutdown<F>(signal: F, shutdown_tx: tokio::sync::oneshot::Sender<()>)
where
    F: std::future::Future<Output = std::io::Result<&'static str>>,
{
    match signal.await {
        Ok(name) => {
            info!("Received {}, stopping after the current cycle...", name);
            let _ = shutdown_tx.send(());
        }
        Err(e) => {
            tracing::error!(
                "Failed to listen for shutdown signal: {}; running until killed",
                e
            );
            std::future::pending::<()>().await;
            drop(shutdown_tx);
        }
    }
}

/// Error types for the sync pipeline
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Copying or removing the scratch snapshot failed
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// The graph store could not be opened or iterated
    #[error("Graph store error: {0}")]
    Graph(String),

    /// Relational store error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record failed validation during transform
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for sync operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;
