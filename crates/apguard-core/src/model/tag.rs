// ── Tags ──
//
// Group, user, and SSID tags as held by the tag directory. SSID tags are
// keyed for deduplication by their name, which is the controller-issued
// profile UUID.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use apguard_api::SsidProfileConfig;

use super::TagUid;

/// Tag kinds the engine reads or writes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TagKind {
    /// Device group.
    Group,
    /// User; may carry an affiliated device group.
    User,
    /// Mirror of a controller SSID profile.
    Ssid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub uid: TagUid,
    pub name: String,
    pub kind: TagKind,

    /// User tags: the device group this user's devices belong to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliated_group: Option<TagUid>,

    /// SSID tags: user tags linked to the profile.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_tags: Vec<TagUid>,

    /// Group tags: VLAN id of the PSK partition this group stands for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psk_vlan: Option<u16>,

    /// SSID tags: the mirrored profile attributes.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attrs: serde_json::Map<String, serde_json::Value>,
}

/// Create-or-update request for the tag directory. The directory
/// deduplicates on `(kind, name)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TagSpec {
    pub name: String,
    pub kind: TagKind,
    pub user_tags: Vec<TagUid>,
    pub attrs: serde_json::Map<String, serde_json::Value>,
}

impl TagSpec {
    /// Mirror of one SSID profile. The UUID doubles as the tag name.
    pub fn ssid_profile(uuid: &str, profile: &SsidProfileConfig) -> Self {
        let mut attrs = profile.extra.clone();
        attrs.insert("uuid".into(), uuid.into());
        if let Some(ref ssid) = profile.ssid {
            attrs.insert("ssid".into(), ssid.clone().into());
        }
        if let Some(vlan) = profile.vlan {
            attrs.insert("vlan".into(), vlan.into());
        }

        Self {
            name: uuid.to_owned(),
            kind: TagKind::Ssid,
            user_tags: profile
                .user_tags
                .iter()
                .filter_map(apguard_api::IdValue::non_empty)
                .map(TagUid::from)
                .collect(),
            attrs,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use apguard_api::IdValue;

    #[test]
    fn ssid_spec_mirrors_profile() {
        let profile = SsidProfileConfig {
            ssid: Some("Office".into()),
            vlan: Some(30),
            user_tags: vec![IdValue::Int(4), IdValue::Int(0), IdValue::Text("9".into())],
            extra: serde_json::Map::new(),
        };
        let spec = TagSpec::ssid_profile("p-1", &profile);
        assert_eq!(spec.name, "p-1");
        assert_eq!(spec.kind, TagKind::Ssid);
        assert_eq!(spec.user_tags, vec![TagUid::from("4"), TagUid::from("9")]);
        assert_eq!(spec.attrs["ssid"], "Office");
        assert_eq!(spec.attrs["vlan"], 30);
    }

    #[test]
    fn kind_round_trips_through_strum() {
        assert_eq!(TagKind::Ssid.to_string(), "ssid");
        assert_eq!("group".parse::<TagKind>().unwrap(), TagKind::Group);
    }
}
