// ── Scopes and tri-state settings ──
//
// A scope is the target level of a feature policy. The global scope
// carries a plain boolean; the other four carry a tri-state so that
// "explicitly off" stays distinct from "not configured".

use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};

use super::{MacAddress, TagUid, is_mac_address, is_path_safe_id};

/// Scope id the global policy is addressed by.
pub const GLOBAL_SCOPE_ID: &str = "0.0.0.0";

/// Where a policy applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Scope {
    Global,
    Tag(TagUid),
    Network(String),
    Device(MacAddress),
    Identity(String),
}

/// Non-global scope kinds, as keyed in the settings store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScopeKind {
    Tag,
    Network,
    Device,
    Identity,
}

impl Scope {
    /// Settings-store key, or `None` for the global scope.
    pub fn key(&self) -> Option<(ScopeKind, String)> {
        match self {
            Self::Global => None,
            Self::Tag(uid) => Some((ScopeKind::Tag, uid.to_string())),
            Self::Network(uuid) => Some((ScopeKind::Network, uuid.clone())),
            Self::Device(mac) => Some((ScopeKind::Device, mac.to_string())),
            Self::Identity(guid) => Some((ScopeKind::Identity, guid.clone())),
        }
    }

    /// Parse the CLI/command form `<kind>:<id>`, or `global` / `0.0.0.0`.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == "global" || raw == GLOBAL_SCOPE_ID {
            return Some(Self::Global);
        }
        let (kind, id) = raw.split_once(':')?;
        let scope = match kind.parse::<ScopeKind>().ok()? {
            ScopeKind::Tag => Self::Tag(TagUid::from(id)),
            ScopeKind::Network => Self::Network(id.to_owned()),
            ScopeKind::Device => Self::Device(MacAddress::parse(id)?),
            ScopeKind::Identity => Self::Identity(id.to_owned()),
        };
        scope.is_valid().then_some(scope)
    }

    /// Device ids must be MAC addresses; every other id must be usable
    /// as a file name component.
    pub fn is_valid(&self) -> bool {
        match self.key() {
            None => true,
            Some((kind, id)) => is_valid_id(kind, &id),
        }
    }
}

/// Whether `id` may key a scope of `kind` in the settings store.
pub fn is_valid_id(kind: ScopeKind, id: &str) -> bool {
    match kind {
        ScopeKind::Device => is_mac_address(id),
        ScopeKind::Tag | ScopeKind::Network | ScopeKind::Identity => is_path_safe_id(id),
    }
}

/// Stored per-scope setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TriState {
    Enabled,
    #[default]
    Unset,
    Disabled,
}

impl TriState {
    /// Numeric encoding: 1, 0, -1.
    pub fn as_i8(self) -> i8 {
        match self {
            Self::Enabled => 1,
            Self::Unset => 0,
            Self::Disabled => -1,
        }
    }

    /// Policy state mapping: `true` enables, `false` unsets, `null` disables.
    pub fn from_policy_state(state: Option<bool>) -> Self {
        match state {
            Some(true) => Self::Enabled,
            Some(false) => Self::Unset,
            None => Self::Disabled,
        }
    }
}

/// Feature policy payload `{ "state": true | false | null }`.
///
/// An absent `state` is distinct from `null`: it leaves the stored
/// setting untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePolicy {
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub state: Option<Option<bool>>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl FeaturePolicy {
    pub fn with_state(state: Option<bool>) -> Self {
        Self { state: Some(state) }
    }

    /// Tri-state the policy maps to, if it carries a state at all.
    pub fn tri_state(&self) -> Option<TriState> {
        self.state.map(TriState::from_policy_state)
    }

    /// Global scope switch: on only for an explicit `true`.
    pub fn is_on(&self) -> bool {
        self.state == Some(Some(true))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn policy_state_mapping() {
        let on: FeaturePolicy = serde_json::from_str(r#"{"state":true}"#).unwrap();
        let off: FeaturePolicy = serde_json::from_str(r#"{"state":false}"#).unwrap();
        let null: FeaturePolicy = serde_json::from_str(r#"{"state":null}"#).unwrap();
        let absent: FeaturePolicy = serde_json::from_str("{}").unwrap();

        assert_eq!(on.tri_state(), Some(TriState::Enabled));
        assert_eq!(off.tri_state(), Some(TriState::Unset));
        assert_eq!(null.tri_state(), Some(TriState::Disabled));
        assert_eq!(absent.tri_state(), None);

        assert!(on.is_on());
        assert!(!null.is_on());
        assert!(!absent.is_on());
    }

    #[test]
    fn tri_state_numeric_encoding() {
        assert_eq!(TriState::Enabled.as_i8(), 1);
        assert_eq!(TriState::default().as_i8(), 0);
        assert_eq!(TriState::Disabled.as_i8(), -1);
    }

    #[test]
    fn scope_parse_forms() {
        assert_eq!(Scope::parse("0.0.0.0"), Some(Scope::Global));
        assert_eq!(Scope::parse("tag:12"), Some(Scope::Tag(TagUid::from("12"))));
        assert_eq!(
            Scope::parse("device:aa:bb:cc:dd:ee:ff"),
            Some(Scope::Device(MacAddress::new("AA:BB:CC:DD:EE:FF")))
        );
        assert_eq!(Scope::parse("device:not-a-mac"), None);
        assert_eq!(Scope::parse("planet:earth"), None);
        assert_eq!(Scope::parse("tag:"), None);
        assert_eq!(Scope::parse("network:../../etc"), None);
        assert_eq!(Scope::parse("identity:a/b"), None);
    }

    #[test]
    fn deserialized_scopes_are_checked_separately() {
        let scope: Scope =
            serde_json::from_str(r#"{"kind":"network","id":"../outside"}"#).unwrap();
        assert!(!scope.is_valid());
        let scope: Scope =
            serde_json::from_str(r#"{"kind":"device","id":"4e:2f:3b:44:ad:aa"}"#).unwrap();
        assert!(scope.is_valid());
        let scope: Scope = serde_json::from_str(r#"{"kind":"device","id":"x/y"}"#).unwrap();
        assert!(!scope.is_valid());
        assert!(Scope::Global.is_valid());
    }

    #[test]
    fn scope_key_excludes_global() {
        assert!(Scope::Global.key().is_none());
        assert_eq!(
            Scope::Network("n-1".into()).key(),
            Some((ScopeKind::Network, "n-1".into()))
        );
    }
}
