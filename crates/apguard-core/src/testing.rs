// Shared fakes for unit tests.

#![allow(clippy::unwrap_used)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use apguard_api::{ApcConfig, StationTable};

use crate::apc::AccessPointController;
use crate::doh::backend::{DohBackend, RestartScheduler, ServerSelection};
use crate::error::CoreError;
use crate::model::{PolicyRule, Tag, TagKind, TagUid};

pub(crate) fn group_tag(uid: &str, name: &str, psk_vlan: Option<u16>) -> Tag {
    Tag {
        uid: TagUid::from(uid),
        name: name.into(),
        kind: TagKind::Group,
        affiliated_group: None,
        user_tags: Vec::new(),
        psk_vlan,
        attrs: serde_json::Map::new(),
    }
}

pub(crate) fn user_tag(uid: &str, name: &str, affiliated: Option<&str>) -> Tag {
    Tag {
        uid: TagUid::from(uid),
        name: name.into(),
        kind: TagKind::User,
        affiliated_group: affiliated.map(TagUid::from),
        user_tags: Vec::new(),
        psk_vlan: None,
        attrs: serde_json::Map::new(),
    }
}

// ── Controller ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RuleCall {
    Upsert(String),
    Batch { pids: Vec<String>, replace: bool },
    Delete(String),
}

#[derive(Default)]
pub(crate) struct FakeApc {
    config: Mutex<ApcConfig>,
    stations: Mutex<StationTable>,
    fail_reads: AtomicBool,
    pub(crate) calls: Mutex<Vec<RuleCall>>,
}

impl FakeApc {
    pub(crate) fn set_profiles(&self, profiles: serde_json::Value) {
        *self.config.lock().unwrap() =
            serde_json::from_value(serde_json::json!({ "profile": profiles })).unwrap();
    }

    pub(crate) fn set_stations(&self, table: serde_json::Value) {
        *self.stations.lock().unwrap() = serde_json::from_value(table).unwrap();
    }

    pub(crate) fn fail_next_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<RuleCall> {
        self.calls.lock().unwrap().clone()
    }

    fn check_reads(&self) -> Result<(), CoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CoreError::Controller {
                message: "connection refused".into(),
                status: None,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AccessPointController for FakeApc {
    async fn active_config(&self) -> Result<ApcConfig, CoreError> {
        self.check_reads()?;
        Ok(self.config.lock().unwrap().clone())
    }

    async fn station_table(&self) -> Result<StationTable, CoreError> {
        self.check_reads()?;
        Ok(self.stations.lock().unwrap().clone())
    }

    async fn upsert_rule(&self, pid: &str, _rule: &PolicyRule) -> Result<(), CoreError> {
        self.calls.lock().unwrap().push(RuleCall::Upsert(pid.into()));
        Ok(())
    }

    async fn upsert_rules(&self, rules: &[PolicyRule], replace: bool) -> Result<(), CoreError> {
        let pids = rules.iter().filter_map(PolicyRule::pid).collect();
        self.calls
            .lock()
            .unwrap()
            .push(RuleCall::Batch { pids, replace });
        Ok(())
    }

    async fn delete_rule(&self, pid: &str) -> Result<(), CoreError> {
        self.calls.lock().unwrap().push(RuleCall::Delete(pid.into()));
        Ok(())
    }
}

// ── DoH backend ─────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct FakeBackend {
    pub(crate) events: Mutex<Vec<&'static str>>,
    pub(crate) config_changed: AtomicBool,
    servers: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub(crate) fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl DohBackend for FakeBackend {
    async fn start(&self) -> Result<(), CoreError> {
        self.record("start");
        Ok(())
    }

    async fn stop(&self) -> Result<(), CoreError> {
        self.record("stop");
        Ok(())
    }

    async fn restart(&self) -> Result<(), CoreError> {
        self.record("restart");
        Ok(())
    }

    async fn prepare_config(&self, _recheck: bool) -> Result<bool, CoreError> {
        self.record("prepare");
        Ok(self.config_changed.swap(false, Ordering::SeqCst))
    }

    async fn reset_settings(&self) -> Result<(), CoreError> {
        self.record("reset_settings");
        self.servers.lock().unwrap().clear();
        Ok(())
    }

    fn local_server(&self) -> String {
        "127.0.0.1#8854".into()
    }

    async fn selected_servers(&self) -> Vec<String> {
        self.servers.lock().unwrap().clone()
    }

    async fn customized_servers(&self) -> Vec<crate::doh::backend::DohServer> {
        Vec::new()
    }

    async fn all_server_names(&self) -> Vec<String> {
        vec!["cloudflare".into(), "quad9".into()]
    }

    async fn set_servers(&self, selection: ServerSelection) -> Result<bool, CoreError> {
        match selection {
            ServerSelection::Selected(names) => {
                let mut current = self.servers.lock().unwrap();
                let changed = *current != names;
                *current = names;
                Ok(changed)
            }
            ServerSelection::Customized(_) => Ok(false),
        }
    }
}

#[derive(Default)]
pub(crate) struct CountingRestart {
    pub(crate) count: AtomicUsize,
}

impl CountingRestart {
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl RestartScheduler for CountingRestart {
    fn schedule_restart(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}
