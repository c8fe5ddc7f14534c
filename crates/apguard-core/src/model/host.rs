use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use super::{MacAddress, TagKind, TagUid};

/// A known device, keyed by MAC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub mac: MacAddress,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ipv6: Vec<Ipv6Addr>,

    /// Tag policies by kind: `ssid` holds at most one SSID tag, `group`
    /// at most one device group.
    #[serde(default)]
    pub policy: BTreeMap<TagKind, Vec<TagUid>>,
}

impl Host {
    pub fn new(mac: MacAddress) -> Self {
        Self {
            mac,
            ipv4: None,
            ipv6: Vec::new(),
            policy: BTreeMap::new(),
        }
    }

    /// Tags currently assigned under `kind`.
    pub fn tags(&self, kind: TagKind) -> &[TagUid] {
        self.policy.get(&kind).map_or(&[], Vec::as_slice)
    }

    pub fn has_tag(&self, kind: TagKind, uid: &TagUid) -> bool {
        self.tags(kind).contains(uid)
    }
}

/// A network segment. Its dnsmasq directives live in a per-network
/// subdirectory named after the UUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A per-user identity (VPN peer and the like).
///
/// `file_prefix` and `group_id` are how the DNS backend addresses the
/// identity: its directive file is `<file_prefix>_<feature>.conf` and
/// its selector is `group-tag=@<group_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub guid: String,
    pub uid: String,
    pub file_prefix: String,
    pub group_id: String,
}
