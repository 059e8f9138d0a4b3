//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel announcement database model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelAnnouncementModel {
    /// Row ID
    pub id: i64,
    /// Short channel id; stored by bit pattern in a signed column
    pub short_channel_id: u64,
    /// First participant's node key (hex)
    pub node_id_1: String,
    /// Second participant's node key (hex)
    pub node_id_2: String,
    /// First participant's funding key (hex)
    pub bitcoin_key_1: String,
    /// Second participant's funding key (hex)
    pub bitcoin_key_2: String,
    /// Announcement extension bytes (hex, possibly empty)
    pub extra_opaque_data: String,
    /// JSON rendering of the announcement
    pub json_data: Option<String>,
    /// When the row was first written
    pub first_seen: DateTime<Utc>,
    /// When the row was last observed
    pub last_seen: DateTime<Utc>,
}

/// Node announcement database model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAnnouncementModel {
    /// Row ID
    pub id: i64,
    /// Node public key (hex)
    pub node_id: String,
    /// Node alias
    pub alias: String,
    /// Display color as `#rrggbb`
    pub rgb_color: String,
    /// JSON rendering of the announcement
    pub json_data: Option<String>,
    /// When the row was first written
    pub first_seen: DateTime<Utc>,
    /// When the row was last observed
    pub last_seen: DateTime<Utc>,
}

/// Node address database model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAddressModel {
    /// Row ID
    pub id: i64,
    /// Node public key (hex)
    pub node_id: String,
    /// Host, or the raw address when it carried no port
    pub address: String,
    /// Port, 0 when unknown
    pub port: u16,
    /// When the row was first written
    pub first_seen: DateTime<Utc>,
    /// When the row was last observed
    pub last_seen: DateTime<Utc>,
}

/// Row totals of the synced tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    /// Rows in `channel_announcements`
    pub channels: u64,
    /// Rows in `node_announcements`
    pub nodes: u64,
    /// Rows in `node_addresses`
    pub addresses: u64,
}
