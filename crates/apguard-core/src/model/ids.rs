// ── Core identity types ──
//
// MacAddress and TagUid key every directory lookup. Station MACs arrive
// in mixed case from the controller; directive files and host lookups
// always use the uppercase colon-separated form.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, normalized to uppercase colon-separated format (AA:BB:CC:DD:EE:FF).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MacAddress(String);

impl MacAddress {
    /// Normalize any common notation without validating it.
    /// Accepts colon-separated or dash-separated hex.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let normalized = raw.as_ref().trim().to_uppercase().replace('-', ":");
        Self(normalized)
    }

    /// Parse and validate: exactly six two-digit hex octets.
    pub fn parse(raw: impl AsRef<str>) -> Option<Self> {
        let mac = Self::new(raw);
        is_mac_address(&mac.0).then_some(mac)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `true` if `s` is a colon- or dash-separated MAC address.
pub fn is_mac_address(s: &str) -> bool {
    let octets: Vec<&str> = s.split([':', '-']).collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}

/// `true` if `id` can name a directive file without leaving its
/// directory: non-empty, no path separators or NUL, not `.` or `..`.
pub fn is_path_safe_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\', '\0'])
}

// ── TagUid ──────────────────────────────────────────────────────────

/// Directory-issued tag identifier.
///
/// Tags are numbered by the directory, but the controller and policy
/// records pass them around as either numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TagUid(String);

impl TagUid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TagUid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TagUid {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<u64> for TagUid {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for TagUid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = apguard_api::IdValue::deserialize(deserializer)?;
        Ok(Self(value.to_string()))
    }
}
