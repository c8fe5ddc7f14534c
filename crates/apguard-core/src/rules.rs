// ── Rule forwarding ──
//
// Mirrors the subset of policy rules the access-point controller can
// enforce itself. Rules outside that subset are skipped quietly; they
// are routine, not errors.

use std::sync::Arc;

use tracing::{debug, info};

use crate::apc::AccessPointController;
use crate::directory::PolicySource;
use crate::error::CoreError;
use crate::model::{EnforcementAction, EnforcementEvent, PolicyRule, is_mac_address};

const FORWARDABLE_TYPES: [&str; 3] = ["device", "tag", "intranet"];
const TAG_PREFIX: &str = "tag:";

/// Whether the controller can enforce `rule`.
///
/// Forwardable rules target a device, tag, or the intranet; carry no
/// identity guids; scope only to MAC addresses; and reference tags by
/// `tag:` prefixed ids. Device rules must target a MAC.
pub fn is_forwardable(rule: &PolicyRule) -> bool {
    let Some(rule_type) = rule.rule_type.as_deref() else {
        return false;
    };
    if !FORWARDABLE_TYPES.contains(&rule_type) {
        return false;
    }
    if rule.guids.as_ref().is_some_and(|g| !g.is_empty()) {
        return false;
    }
    if rule
        .scope
        .as_ref()
        .is_some_and(|s| !s.iter().all(|m| is_mac_address(m)))
    {
        return false;
    }
    if rule
        .tag
        .as_ref()
        .is_some_and(|t| !t.iter().all(|t| t.starts_with(TAG_PREFIX)))
    {
        return false;
    }
    if rule_type == "device" && !rule.target.as_deref().is_some_and(is_mac_address) {
        return false;
    }
    true
}

pub struct RuleForwarder {
    apc: Arc<dyn AccessPointController>,
    policies: Arc<dyn PolicySource>,
}

impl RuleForwarder {
    pub fn new(apc: Arc<dyn AccessPointController>, policies: Arc<dyn PolicySource>) -> Self {
        Self { apc, policies }
    }

    /// Forward one enforcement notification.
    pub async fn handle_enforcement(&self, event: &EnforcementEvent) -> Result<(), CoreError> {
        let rule = &event.policy;
        let Some(pid) = rule.pid() else {
            return Err(CoreError::malformed("policy enforcement", "missing pid"));
        };
        if !is_forwardable(rule) {
            debug!(pid, "rule not forwardable, skipping");
            return Ok(());
        }

        match event.action {
            EnforcementAction::Enforce | EnforcementAction::Reenforce if rule.is_disabled() => {
                debug!(pid, "rule disabled, removing upstream");
                self.apc.delete_rule(&pid).await
            }
            EnforcementAction::Enforce | EnforcementAction::Reenforce => {
                debug!(pid, action = %event.action, "forwarding rule");
                self.apc.upsert_rule(&pid, rule).await
            }
            EnforcementAction::Unenforce => {
                debug!(pid, "withdrawing rule");
                self.apc.delete_rule(&pid).await
            }
        }
    }

    /// Replace the controller's rule set with every forwardable active
    /// policy. Returns how many were sent.
    pub async fn sync_all(&self) -> Result<usize, CoreError> {
        let rules: Vec<PolicyRule> = self
            .policies
            .active_policies()
            .await?
            .into_iter()
            .filter(|r| r.pid().is_some() && is_forwardable(r))
            .collect();
        self.apc.upsert_rules(&rules, true).await?;
        info!(count = rules.len(), "rule set synced to controller");
        Ok(rules.len())
    }
}
