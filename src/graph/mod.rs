//! Channel graph access
//!
//! The graph store itself is an external collaborator. The rest of the crate
//! only sees it through [`ChannelGraph`], which offers two read-only traversals:
//! one over channels and one over nodes. [`SnapshotGraph`] is the bundled
//! backend, reading a JSON export of the graph.

use crate::{SyncError, SyncResult};
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

mod snapshot;

pub use snapshot::SnapshotGraph;

/// Serialized compressed secp256k1 public key
pub type PubKeyBytes = [u8; 33];

/// A channel as announced on the gossip network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEdgeInfo {
    /// Short channel id in its u64 encoding
    pub channel_id: u64,
    /// Genesis hash of the chain the channel lives on, in internal byte order
    pub chain_hash: [u8; 32],
    /// First participant's node key
    pub node_key1: PubKeyBytes,
    /// Second participant's node key
    pub node_key2: PubKeyBytes,
    /// First participant's funding key
    pub bitcoin_key1: PubKeyBytes,
    /// Second participant's funding key
    pub bitcoin_key2: PubKeyBytes,
    /// Trailing announcement bytes this version does not interpret
    pub extra_opaque_data: Vec<u8>,
}

/// Routing policy for one direction of a channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelPolicy {
    /// Unix time of the last channel update
    pub last_update: u32,
    /// CLTV delta required by the forwarding node
    pub time_lock_delta: u32,
    /// Smallest HTLC the node will forward
    pub min_htlc_msat: u64,
    /// Base forwarding fee
    pub fee_base_msat: u64,
    /// Proportional forwarding fee in millionths
    pub fee_rate_milli_msat: u64,
    /// Whether the direction is disabled
    pub disabled: bool,
}

/// A node as announced on the gossip network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightningNode {
    /// Node public key
    pub pub_key: PubKeyBytes,
    /// Announced alias, without padding
    pub alias: String,
    /// Announced display color
    pub color: RgbColor,
    /// Unix time of the last node announcement
    pub last_update: u32,
    /// Advertised network addresses, as `host:port` strings where a port is known
    pub addresses: Vec<String>,
    /// Trailing announcement bytes this version does not interpret
    pub extra_opaque_data: Vec<u8>,
}

/// Display color of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RgbColor {
    /// Red component
    pub r: u8,
    /// Green component
    pub g: u8,
    /// Blue component
    pub b: u8,
}

impl RgbColor {
    /// Create a color from its components
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for RgbColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for RgbColor {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('#').unwrap_or(s);
        let bytes = hex::decode(digits)
            .map_err(|e| SyncError::Validation(format!("invalid color {:?}: {}", s, e)))?;
        match bytes.as_slice() {
            [r, g, b] => Ok(Self::new(*r, *g, *b)),
            _ => Err(SyncError::Validation(format!(
                "invalid color {:?}: expected 3 bytes",
                s
            ))),
        }
    }
}

/// Visitor invoked once per channel with the channel and both directional policies
pub type ChannelVisitor<'a> =
    dyn FnMut(&ChannelEdgeInfo, Option<&ChannelPolicy>, Option<&ChannelPolicy>) -> SyncResult<()> + 'a;

/// Visitor invoked once per node
pub type NodeVisitor<'a> = dyn FnMut(&LightningNode) -> SyncResult<()> + 'a;

/// Read-only traversal over a channel graph store.
///
/// Iteration order is whatever the store provides. Both traversals stop at the
/// first error returned by the visitor and return that error unchanged.
/// Implementations add no locking of their own; callers must not traverse while
/// writing to the same store instance.
pub trait ChannelGraph {
    /// Visit every known channel
    fn for_each_channel(&self, visit: &mut ChannelVisitor<'_>) -> SyncResult<()>;

    /// Visit every known node
    fn for_each_node(&self, visit: &mut NodeVisitor<'_>) -> SyncResult<()>;
}

/// Open a graph store, retrying a fixed number of times with a fixed delay.
///
/// `path` is only used for logging. Returns the last error once `attempts`
/// are exhausted.
pub async fn open_with_retry<G, F, Fut>(
    path: &Path,
    attempts: u32,
    delay: Duration,
    mut open: F,
) -> SyncResult<G>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<G>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match open().await {
            Ok(graph) => {
                debug!("Opened graph store {} on attempt {}", path.display(), attempt);
                return Ok(graph);
            }
            Err(e) if attempt < attempts => {
                warn!(
                    "Opening graph store {} failed (attempt {}/{}): {}",
                    path.display(),
                    attempt,
                    attempts,
                    e
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(SyncError::Graph(format!(
                    "failed to open {} after {} attempts: {}",
                    path.display(),
                    attempts,
                    e
                )));
            }
        }
    }
}
