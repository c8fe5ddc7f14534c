use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use apguard_api::IdValue;

/// A policy rule as stored by the policy source.
///
/// Only the fields the applicability filter reads are typed; everything
/// else rides along in `extra` and is forwarded upstream untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<IdValue>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub rule_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guids: Option<Vec<serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<IdValue>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PolicyRule {
    /// Rule id as a string, if present and non-empty.
    pub fn pid(&self) -> Option<String> {
        self.pid.as_ref().and_then(IdValue::non_empty)
    }

    /// `disabled` is `"1"` (or `1`) on paused rules.
    pub fn is_disabled(&self) -> bool {
        match &self.disabled {
            Some(IdValue::Int(n)) => *n == 1,
            Some(IdValue::Text(s)) => s == "1",
            None => false,
        }
    }
}

/// What the policy engine did to a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EnforcementAction {
    Enforce,
    Reenforce,
    Unenforce,
}

/// Payload of a policy-enforcement notification.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnforcementEvent {
    pub policy: PolicyRule,
    pub action: EnforcementAction,
}
