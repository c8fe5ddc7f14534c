// ── Scope settings store ──
//
// Tri-state settings per scope kind plus the two global switches.
// Absent keys read as `Unset`. Iteration order is insertion order so
// convergence passes visit scopes deterministically.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::model::{ScopeKind, TriState, is_valid_id};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeSettings {
    /// Global scope: policy-driven.
    pub system_switch: bool,
    /// Master switch: set only by admin start/stop.
    pub admin_switch: bool,
    tags: IndexMap<String, TriState>,
    networks: IndexMap<String, TriState>,
    devices: IndexMap<String, TriState>,
    identities: IndexMap<String, TriState>,
}

impl ScopeSettings {
    pub fn get(&self, kind: ScopeKind, id: &str) -> TriState {
        self.map(kind).get(id).copied().unwrap_or_default()
    }

    pub fn set(&mut self, kind: ScopeKind, id: impl Into<String>, state: TriState) {
        self.map_mut(kind).insert(id.into(), state);
    }

    /// Drop a key entirely. Returns the last stored state.
    pub fn remove(&mut self, kind: ScopeKind, id: &str) -> Option<TriState> {
        self.map_mut(kind).shift_remove(id)
    }

    pub fn contains(&self, kind: ScopeKind, id: &str) -> bool {
        self.map(kind).contains_key(id)
    }

    /// Stored ids and states of one kind, in insertion order.
    pub fn entries(&self, kind: ScopeKind) -> Vec<(String, TriState)> {
        self.map(kind)
            .iter()
            .map(|(id, state)| (id.clone(), *state))
            .collect()
    }

    /// Force every stored setting to `Unset`, keeping the keys so the
    /// next convergence pass removes their directives.
    pub fn unset_all(&mut self) {
        for kind in ALL_KINDS {
            for state in self.map_mut(kind).values_mut() {
                *state = TriState::Unset;
            }
        }
    }

    /// Remove keys that cannot name a directive file. Returns what was
    /// removed.
    pub fn drop_invalid_ids(&mut self) -> Vec<(ScopeKind, String)> {
        let mut dropped = Vec::new();
        for kind in ALL_KINDS {
            self.map_mut(kind).retain(|id, _| {
                let keep = is_valid_id(kind, id);
                if !keep {
                    dropped.push((kind, id.clone()));
                }
                keep
            });
        }
        dropped
    }

    pub fn len(&self) -> usize {
        ALL_KINDS.iter().map(|k| self.map(*k).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn map(&self, kind: ScopeKind) -> &IndexMap<String, TriState> {
        match kind {
            ScopeKind::Tag => &self.tags,
            ScopeKind::Network => &self.networks,
            ScopeKind::Device => &self.devices,
            ScopeKind::Identity => &self.identities,
        }
    }

    fn map_mut(&mut self, kind: ScopeKind) -> &mut IndexMap<String, TriState> {
        match kind {
            ScopeKind::Tag => &mut self.tags,
            ScopeKind::Network => &mut self.networks,
            ScopeKind::Device => &mut self.devices,
            ScopeKind::Identity => &mut self.identities,
        }
    }
}

/// Order in which convergence visits scope kinds.
pub const ALL_KINDS: [ScopeKind; 4] = [
    ScopeKind::Device,
    ScopeKind::Tag,
    ScopeKind::Network,
    ScopeKind::Identity,
];
