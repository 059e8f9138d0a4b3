//! Record normalization
//!
//! Pure mapping from raw graph records to the rows persisted by the sync.
//! Keys become lowercase hex, short channel ids become both a u64 and the
//! `block:tx:output` form, aliases lose their NUL padding and advertised
//! addresses are split into host and port.

use crate::graph::{ChannelEdgeInfo, LightningNode};
use crate::{SyncError, SyncResult};
use serde::Serialize;
use std::fmt;

/// Width of the alias field in a node announcement
pub const ALIAS_LEN: usize = 32;

/// Fixed-width node alias as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAlias([u8; ALIAS_LEN]);

impl NodeAlias {
    /// Pad an alias string to the wire width, failing if it does not fit
    pub fn new(alias: &str) -> SyncResult<Self> {
        let bytes = alias.as_bytes();
        if bytes.len() > ALIAS_LEN {
            return Err(SyncError::Validation(format!(
                "alias is {} bytes, limit is {}",
                bytes.len(),
                ALIAS_LEN
            )));
        }

        let mut buf = [0u8; ALIAS_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Wrap a raw alias buffer
    pub const fn from_bytes(bytes: [u8; ALIAS_LEN]) -> Self {
        Self(bytes)
    }

    /// The padded wire bytes
    pub fn as_bytes(&self) -> &[u8; ALIAS_LEN] {
        &self.0
    }
}

impl fmt::Display for NodeAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = String::from_utf8_lossy(&self.0);
        f.write_str(text.trim_matches('\0'))
    }
}

/// Short channel id: funding block height, transaction index and output index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortChannelId(pub u64);

impl ShortChannelId {
    /// Block containing the funding transaction
    pub fn block_height(&self) -> u32 {
        (self.0 >> 40) as u32
    }

    /// Position of the funding transaction within its block
    pub fn tx_index(&self) -> u32 {
        ((self.0 >> 16) & 0xff_ffff) as u32
    }

    /// Funding output index
    pub fn output_index(&self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

impl From<u64> for ShortChannelId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ShortChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.block_height(),
            self.tx_index(),
            self.output_index()
        )
    }
}

/// Row for `channel_announcements`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRow {
    /// Short channel id as u64
    pub short_channel_id: u64,
    /// Hex node key of the first participant
    pub node_id_1: String,
    /// Hex node key of the second participant
    pub node_id_2: String,
    /// Hex funding key of the first participant
    pub bitcoin_key_1: String,
    /// Hex funding key of the second participant
    pub bitcoin_key_2: String,
    /// Hex extension bytes, empty when absent
    pub extra_opaque_data: String,
    /// JSON rendering of the announcement
    pub json_data: String,
}

/// Row for `node_announcements`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRow {
    /// Hex node public key
    pub node_id: String,
    /// Alias with padding removed
    pub alias: String,
    /// Color as `#rrggbb`
    pub rgb_color: String,
    /// JSON rendering of the announcement
    pub json_data: String,
}

/// Row for `node_addresses`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRow {
    /// Hex node public key
    pub node_id: String,
    /// Host part, or the whole address when it has no usable port
    pub address: String,
    /// Port, 0 when unknown
    pub port: u16,
}

#[derive(Serialize)]
struct ChannelAnnouncementJson<'a> {
    chain_hash: String,
    short_channel_id: String,
    node_id_1: &'a str,
    node_id_2: &'a str,
    bitcoin_key_1: &'a str,
    bitcoin_key_2: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    extra_opaque_data: &'a str,
}

#[derive(Serialize)]
struct NodeAnnouncementJson<'a> {
    node_id: &'a str,
    alias: &'a str,
    addresses: Vec<AddressJson>,
    timestamp: u32,
    rgb_color: &'a str,
}

#[derive(Serialize)]
struct AddressJson {
    #[serde(rename = "type")]
    kind: &'static str,
    address: String,
    port: u16,
}

/// An advertised address split into host and optional port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    /// Host part, or the whole input when splitting failed
    pub host: String,
    /// Port when one was present and valid
    pub port: Option<u16>,
}

impl ParsedAddress {
    /// Split an address, keeping the whole string as host when it has no valid port
    pub fn parse(addr: &str) -> Self {
        match split_host_port(addr) {
            Some((host, port)) => Self {
                host: host.to_string(),
                port: Some(port),
            },
            None => Self {
                host: addr.to_string(),
                port: None,
            },
        }
    }
}

/// Split `host:port` or `[v6host]:port`.
///
/// Returns `None` when the port is missing or not a valid u16, or when an
/// unbracketed host contains further colons.
pub fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        (host, after.strip_prefix(':')?)
    } else {
        let (host, port) = addr.rsplit_once(':')?;
        if host.contains(':') {
            return None;
        }
        (host, port)
    };

    if host.contains('[') || host.contains(']') {
        return None;
    }

    let port = port.parse::<u16>().ok()?;
    Some((host, port))
}

/// Normalize a channel record
pub fn channel_row(info: &ChannelEdgeInfo) -> SyncResult<ChannelRow> {
    let node_id_1 = hex::encode(info.node_key1);
    let node_id_2 = hex::encode(info.node_key2);
    let bitcoin_key_1 = hex::encode(info.bitcoin_key1);
    let bitcoin_key_2 = hex::encode(info.bitcoin_key2);
    let extra_opaque_data = hex::encode(&info.extra_opaque_data);

    let mut chain_hash = info.chain_hash;
    chain_hash.reverse();

    let json_data = serde_json::to_string(&ChannelAnnouncementJson {
        chain_hash: hex::encode(chain_hash),
        short_channel_id: ShortChannelId(info.channel_id).to_string(),
        node_id_1: &node_id_1,
        node_id_2: &node_id_2,
        bitcoin_key_1: &bitcoin_key_1,
        bitcoin_key_2: &bitcoin_key_2,
        extra_opaque_data: &extra_opaque_data,
    })?;

    Ok(ChannelRow {
        short_channel_id: info.channel_id,
        node_id_1,
        node_id_2,
        bitcoin_key_1,
        bitcoin_key_2,
        extra_opaque_data,
        json_data,
    })
}

/// Normalize a node record.
///
/// Fails when the alias does not fit the fixed wire width.
pub fn node_row(node: &LightningNode) -> SyncResult<NodeRow> {
    let node_id = hex::encode(node.pub_key);

    let alias = NodeAlias::new(&node.alias)
        .map_err(|e| SyncError::Validation(format!("node {}: {}", node_id, e)))?
        .to_string();
    let rgb_color = node.color.to_string();

    let addresses = node
        .addresses
        .iter()
        .map(|addr| {
            let parsed = ParsedAddress::parse(addr);
            match parsed.port {
                Some(port) => AddressJson {
                    kind: "tcp",
                    address: parsed.host,
                    port,
                },
                None => AddressJson {
                    kind: "unknown",
                    address: parsed.host,
                    port: 0,
                },
            }
        })
        .collect();

    let json_data = serde_json::to_string(&NodeAnnouncementJson {
        node_id: &node_id,
        alias: &alias,
        addresses,
        timestamp: node.last_update,
        rgb_color: &rgb_color,
    })?;

    Ok(NodeRow {
        node_id,
        alias,
        rgb_color,
        json_data,
    })
}

/// One address row per advertised address; unparsable addresses get port 0
pub fn address_rows(node: &LightningNode) -> Vec<AddressRow> {
    let node_id = hex::encode(node.pub_key);

    node.addresses
        .iter()
        .map(|addr| {
            let parsed = ParsedAddress::parse(addr);
            AddressRow {
                node_id: node_id.clone(),
                address: parsed.host,
                port: parsed.port.unwrap_or(0),
            }
        })
        .collect()
}
