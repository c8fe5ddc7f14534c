// Wire types for the controller REST surface and bus payloads.
//
// The controller is loose about number-vs-string ids and nests the
// station table by profile; these types absorb that so the core only
// deals with normalized values.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Identifiers ─────────────────────────────────────────────────────

/// An identifier the controller may send either as a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Int(i64),
    Text(String),
}

impl IdValue {
    /// The id as a string, or `None` for empty / zero values.
    pub fn non_empty(&self) -> Option<String> {
        match self {
            Self::Int(0) => None,
            Self::Int(n) => Some(n.to_string()),
            Self::Text(s) if s.trim().is_empty() => None,
            Self::Text(s) => Some(s.trim().to_owned()),
        }
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

// ── Active configuration ────────────────────────────────────────────

/// The controller's active configuration (`GET config/active`).
///
/// Only the SSID profile map is interpreted; the rest is kept verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApcConfig {
    #[serde(default)]
    pub profile: BTreeMap<String, SsidProfileConfig>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One SSID profile, keyed by its UUID in [`ApcConfig::profile`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SsidProfileConfig {
    /// Broadcast name.
    #[serde(default)]
    pub ssid: Option<String>,

    #[serde(default)]
    pub vlan: Option<u16>,

    /// User tags affiliated with this SSID.
    #[serde(default, rename = "userTags")]
    pub user_tags: Vec<IdValue>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── Station table ───────────────────────────────────────────────────

/// Key of the per-profile list holding stations outside any PSK group.
pub const PHY_KEY: &str = "phy";
/// Prefix of per-profile lists keyed by PSK-group VLAN id.
pub const VLAN_KEY_PREFIX: &str = "vlan:";

/// Full station-to-SSID mapping (`GET status/ssid`).
///
/// Shape: `{ "<profile uuid>": { "phy": [mac, ...], "vlan:<vid>": [mac, ...] } }`.
/// Entries that do not match the shape are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationTable(pub BTreeMap<String, serde_json::Value>);

/// One station's place in the [`StationTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationAssignment {
    pub profile_uuid: String,
    /// Station MAC, uppercased.
    pub mac: String,
    /// VLAN id of the PSK group the station joined through, if any.
    pub psk_vlan: Option<String>,
}

impl StationTable {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flatten the nested table into one assignment per station.
    pub fn assignments(&self) -> Vec<StationAssignment> {
        let mut out = Vec::new();
        for (uuid, status) in &self.0 {
            let Some(lists) = status.as_object() else {
                continue;
            };
            for (key, value) in lists {
                let Some(macs) = value.as_array() else {
                    continue;
                };
                let psk_vlan = if key == PHY_KEY {
                    None
                } else if let Some(vid) = key.strip_prefix(VLAN_KEY_PREFIX) {
                    Some(vid.to_owned())
                } else {
                    continue;
                };
                for mac in macs.iter().filter_map(serde_json::Value::as_str) {
                    out.push(StationAssignment {
                        profile_uuid: uuid.clone(),
                        mac: mac.to_uppercase(),
                        psk_vlan: psk_vlan.clone(),
                    });
                }
            }
        }
        out
    }
}

// ── Bus payloads ────────────────────────────────────────────────────

/// Station update notification (`FWAPC_SSID_STA_UPDATE`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StationUpdate {
    pub action: String,

    /// SSID profile UUID.
    #[serde(default)]
    pub id: Option<String>,

    /// PSK group id.
    #[serde(default, rename = "groupId")]
    pub group_id: Option<IdValue>,

    #[serde(default)]
    pub station: Option<StationInfo>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StationInfo {
    #[serde(default, rename = "macAddr")]
    pub mac_addr: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StationUpdate {
    pub fn is_join(&self) -> bool {
        self.action == "join"
    }

    pub fn station_mac(&self) -> Option<&str> {
        self.station
            .as_ref()
            .and_then(|s| s.mac_addr.as_deref())
            .filter(|m| !m.is_empty())
    }
}

/// Source or destination port: a single port or an aggregated list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ports {
    One(u16),
    Many(Vec<u16>),
}

/// One record of a conntrack batch (`FWAPC_CONNTRACK_UPDATE`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConntrackRecord {
    pub ts: f64,
    /// Address family: 4 or 6.
    pub af: u8,
    pub sh: String,
    pub dh: String,
    pub sp: Ports,
    pub dp: Ports,
    pub ob: u64,
    pub rb: u64,
    pub pr: String,
    #[serde(default)]
    pub du: Option<f64>,
    #[serde(default)]
    pub cnt: Option<u64>,
}
