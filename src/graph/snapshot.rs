//! JSON graph snapshot backend
//!
//! Reads a graph export shaped like `lncli describegraph` output, extended with
//! the announcement fields the sync needs (`chain_hash`, `bitcoin_key_1`,
//! `bitcoin_key_2`, `extra_opaque_data`):
//!
//! ```json
//! {
//!   "nodes": [
//!     {
//!       "pub_key": "02…",
//!       "alias": "alice",
//!       "color": "#3399ff",
//!       "last_update": 1700000000,
//!       "addresses": [{ "network": "tcp", "addr": "203.0.113.5:9735" }]
//!     }
//!   ],
//!   "edges": [
//!     {
//!       "channel_id": "869059488651509761",
//!       "node1_pub": "02…",
//!       "node2_pub": "03…",
//!       "bitcoin_key_1": "02…",
//!       "bitcoin_key_2": "03…",
//!       "node1_policy": { "fee_base_msat": "1000", "disabled": false },
//!       "node2_policy": null
//!     }
//!   ]
//! }
//! ```
//!
//! Hex fields are decoded and length-checked when the file is opened, so a
//! snapshot that opens successfully never fails during traversal.

use super::{
    ChannelEdgeInfo, ChannelGraph, ChannelPolicy, ChannelVisitor, LightningNode, NodeVisitor,
    PubKeyBytes, RgbColor,
};
use crate::{SyncError, SyncResult};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use tracing::debug;

/// Bitcoin mainnet genesis hash in display order, assumed when an edge omits `chain_hash`
const MAINNET_CHAIN_HASH: &str = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f";

/// A fully decoded channel graph held in memory
#[derive(Debug, Clone, Default)]
pub struct SnapshotGraph {
    channels: Vec<ChannelEntry>,
    nodes: Vec<LightningNode>,
}

#[derive(Debug, Clone)]
struct ChannelEntry {
    info: ChannelEdgeInfo,
    policy1: Option<ChannelPolicy>,
    policy2: Option<ChannelPolicy>,
}

impl SnapshotGraph {
    /// Open and decode a snapshot file
    pub async fn open(path: &Path) -> SyncResult<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SyncError::Graph(format!("failed to read {}: {}", path.display(), e)))?;

        let graph = Self::from_json(&bytes)
            .map_err(|e| SyncError::Graph(format!("{}: {}", path.display(), e)))?;

        debug!(
            "Loaded graph snapshot {}: {} channels, {} nodes",
            path.display(),
            graph.channel_count(),
            graph.node_count()
        );

        Ok(graph)
    }

    /// Decode a snapshot from JSON bytes
    pub fn from_json(bytes: &[u8]) -> SyncResult<Self> {
        let file: GraphFile = serde_json::from_slice(bytes)?;

        let channels = file
            .edges
            .into_iter()
            .map(EdgeEntry::into_channel)
            .collect::<SyncResult<Vec<_>>>()?;

        let nodes = file
            .nodes
            .into_iter()
            .map(NodeEntry::into_node)
            .collect::<SyncResult<Vec<_>>>()?;

        Ok(Self { channels, nodes })
    }

    /// Build a graph from already decoded records, without policies
    pub fn from_parts(channels: Vec<ChannelEdgeInfo>, nodes: Vec<LightningNode>) -> Self {
        let channels = channels
            .into_iter()
            .map(|info| ChannelEntry {
                info,
                policy1: None,
                policy2: None,
            })
            .collect();

        Self { channels, nodes }
    }

    /// Number of channels in the snapshot
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of nodes in the snapshot
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl ChannelGraph for SnapshotGraph {
    fn for_each_channel(&self, visit: &mut ChannelVisitor<'_>) -> SyncResult<()> {
        for entry in &self.channels {
            visit(&entry.info, entry.policy1.as_ref(), entry.policy2.as_ref())?;
        }
        Ok(())
    }

    fn for_each_node(&self, visit: &mut NodeVisitor<'_>) -> SyncResult<()> {
        for node in &self.nodes {
            visit(node)?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct GraphFile {
    #[serde(default)]
    nodes: Vec<NodeEntry>,
    #[serde(default)]
    edges: Vec<EdgeEntry>,
}

#[derive(Deserialize)]
struct NodeEntry {
    pub_key: String,
    #[serde(default)]
    alias: String,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    last_update: u32,
    #[serde(default)]
    addresses: Vec<AddressEntry>,
    #[serde(default)]
    extra_opaque_data: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AddressEntry {
    Plain(String),
    Described { addr: String },
}

#[derive(Deserialize)]
struct EdgeEntry {
    #[serde(deserialize_with = "u64_from_str_or_num")]
    channel_id: u64,
    #[serde(default)]
    chain_hash: Option<String>,
    node1_pub: String,
    node2_pub: String,
    bitcoin_key_1: String,
    bitcoin_key_2: String,
    #[serde(default)]
    extra_opaque_data: String,
    #[serde(default)]
    node1_policy: Option<PolicyEntry>,
    #[serde(default)]
    node2_policy: Option<PolicyEntry>,
}

#[derive(Deserialize)]
struct PolicyEntry {
    #[serde(default)]
    last_update: u32,
    #[serde(default)]
    time_lock_delta: u32,
    #[serde(default, deserialize_with = "u64_from_str_or_num")]
    min_htlc: u64,
    #[serde(default, deserialize_with = "u64_from_str_or_num")]
    fee_base_msat: u64,
    #[serde(default, deserialize_with = "u64_from_str_or_num")]
    fee_rate_milli_msat: u64,
    #[serde(default)]
    disabled: bool,
}

impl NodeEntry {
    fn into_node(self) -> SyncResult<LightningNode> {
        let pub_key = decode_key("pub_key", &self.pub_key)?;
        let color = match self.color.as_deref() {
            Some(c) if !c.is_empty() => c.parse::<RgbColor>()?,
            _ => RgbColor::default(),
        };

        let addresses = self
            .addresses
            .into_iter()
            .map(|a| match a {
                AddressEntry::Plain(addr) | AddressEntry::Described { addr } => addr,
            })
            .collect();

        Ok(LightningNode {
            pub_key,
            alias: self.alias,
            color,
            last_update: self.last_update,
            addresses,
            extra_opaque_data: decode_blob("extra_opaque_data", &self.extra_opaque_data)?,
        })
    }
}

impl EdgeEntry {
    fn into_channel(self) -> SyncResult<ChannelEntry> {
        let chain_hash = self.chain_hash.as_deref().unwrap_or(MAINNET_CHAIN_HASH);
        let mut chain_hash: [u8; 32] = decode_array("chain_hash", chain_hash)?;
        // Display order is the reverse of the in-memory hash.
        chain_hash.reverse();

        let info = ChannelEdgeInfo {
            channel_id: self.channel_id,
            chain_hash,
            node_key1: decode_key("node1_pub", &self.node1_pub)?,
            node_key2: decode_key("node2_pub", &self.node2_pub)?,
            bitcoin_key1: decode_key("bitcoin_key_1", &self.bitcoin_key_1)?,
            bitcoin_key2: decode_key("bitcoin_key_2", &self.bitcoin_key_2)?,
            extra_opaque_data: decode_blob("extra_opaque_data", &self.extra_opaque_data)?,
        };

        Ok(ChannelEntry {
            info,
            policy1: self.node1_policy.map(PolicyEntry::into_policy),
            policy2: self.node2_policy.map(PolicyEntry::into_policy),
        })
    }
}

impl PolicyEntry {
    fn into_policy(self) -> ChannelPolicy {
        ChannelPolicy {
            last_update: self.last_update,
            time_lock_delta: self.time_lock_delta,
            min_htlc_msat: self.min_htlc,
            fee_base_msat: self.fee_base_msat,
            fee_rate_milli_msat: self.fee_rate_milli_msat,
            disabled: self.disabled,
        }
    }
}

fn decode_key(field: &str, value: &str) -> SyncResult<PubKeyBytes> {
    decode_array(field, value)
}

fn decode_array<const N: usize>(field: &str, value: &str) -> SyncResult<[u8; N]> {
    let bytes = decode_blob(field, value)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        SyncError::Graph(format!("{} must be {} bytes, got {}", field, N, len))
    })
}

fn decode_blob(field: &str, value: &str) -> SyncResult<Vec<u8>> {
    hex::decode(value).map_err(|e| SyncError::Graph(format!("{} is not valid hex: {}", field, e)))
}

/// lncli renders 64-bit integers as JSON strings; accept both forms.
fn u64_from_str_or_num<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Number(u64),
        Text(String),
    }

    match Flexible::deserialize(deserializer)? {
        Flexible::Number(n) => Ok(n),
        Flexible::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
