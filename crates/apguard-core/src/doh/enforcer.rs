// ── Tiered DoH enforcement ──
//
// Resolves the scope hierarchy (global, tag, network, device, identity)
// into dnsmasq directive files. Every pass is idempotent: a file is only
// rewritten when its content changes, and re-running `apply_doh` with
// unchanged settings leaves the directory untouched.
//
// The settings mutex guards read-modify-write of the scope maps only.
// It is never held across directive I/O or collaborator calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::backend::{DohBackend, DohServer, RestartScheduler, ServerSelection};
use super::directive::{DirectiveLayout, Polarity, remove_if_present, write_if_changed};
use crate::directory::{FeatureFlags, IdentityDirectory, NetworkDirectory, TagDirectory};
use crate::error::CoreError;
use crate::model::{
    FeaturePolicy, Identity, MacAddress, Scope, ScopeKind, TagUid, TriState, is_path_safe_id,
    is_valid_id,
};
use crate::store::ScopeSettings;
use crate::store::settings::ALL_KINDS;

/// What a scope pass did to its directive file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    /// Opt-in directive written.
    Start,
    /// Negated directive written.
    Stop,
    /// Directive file removed.
    Reset,
}

impl Transition {
    fn for_state(state: TriState) -> Self {
        match state {
            TriState::Enabled => Self::Start,
            TriState::Disabled => Self::Stop,
            TriState::Unset => Self::Reset,
        }
    }
}

/// Outcome of one `apply_doh` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub applied: usize,
    /// Settings dropped because their entity no longer exists.
    pub pruned: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeEntry {
    pub kind: ScopeKind,
    pub id: String,
    pub state: TriState,
}

#[derive(Debug, Clone, Serialize)]
pub struct DohStatus {
    pub feature_on: bool,
    pub admin_switch: bool,
    pub system_switch: bool,
    pub selected_servers: Vec<String>,
    pub customized_servers: Vec<DohServer>,
    pub all_servers: Vec<String>,
    pub scopes: Vec<ScopeEntry>,
}

/// Everything the enforcer talks to.
pub struct DohCollaborators {
    pub tags: Arc<dyn TagDirectory>,
    pub networks: Arc<dyn NetworkDirectory>,
    pub identities: Arc<dyn IdentityDirectory>,
    pub features: Arc<dyn FeatureFlags>,
    pub backend: Arc<dyn DohBackend>,
    pub restart: Arc<dyn RestartScheduler>,
}

struct Target {
    file: PathBuf,
    start: String,
    stop: String,
}

pub struct DohEnforcer {
    layout: DirectiveLayout,
    deps: DohCollaborators,
    settings: Mutex<ScopeSettings>,
    /// Last known identity per guid, so a deleted identity's directive
    /// can still be located and removed.
    identity_files: DashMap<String, Identity>,
    state_path: Option<PathBuf>,
}

impl DohEnforcer {
    pub fn new(layout: DirectiveLayout, deps: DohCollaborators) -> Self {
        Self {
            layout,
            deps,
            settings: Mutex::new(ScopeSettings::default()),
            identity_files: DashMap::new(),
            state_path: None,
        }
    }

    /// Persist scope settings to `path` after every mutation.
    #[must_use]
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    pub fn layout(&self) -> &DirectiveLayout {
        &self.layout
    }

    /// Restore persisted settings. Returns `false` if there was nothing
    /// to restore.
    pub async fn load_state(&self) -> Result<bool, CoreError> {
        let Some(path) = &self.state_path else {
            return Ok(false);
        };
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let mut restored: ScopeSettings =
            serde_json::from_str(&raw).map_err(|e| CoreError::malformed("DoH settings", e))?;
        for (kind, id) in restored.drop_invalid_ids() {
            warn!(%kind, id, "dropping persisted DoH setting with an unusable id");
        }
        debug!(entries = restored.len(), "restored DoH scope settings");
        *self.settings.lock().await = restored;
        Ok(true)
    }

    /// Copy of the current settings.
    pub async fn settings(&self) -> ScopeSettings {
        self.settings.lock().await.clone()
    }

    // ── Policy intake ────────────────────────────────────────────────

    /// Record a policy for `scope` and converge that scope.
    ///
    /// Global sets the system switch (`true` only). Other scopes map
    /// `true → Enabled`, `false → Unset`, `null → Disabled`; a policy
    /// without a state re-applies the stored value.
    pub async fn apply_policy(
        &self,
        scope: &Scope,
        policy: &FeaturePolicy,
    ) -> Result<Transition, CoreError> {
        if !scope.is_valid() {
            return Err(CoreError::malformed("scope", format!("{scope:?}")));
        }
        match scope.key() {
            None => {
                self.settings.lock().await.system_switch = policy.is_on();
                self.save_state().await;
                self.apply_system().await
            }
            Some((kind, id)) => {
                if let Some(state) = policy.tri_state() {
                    self.settings.lock().await.set(kind, id.clone(), state);
                    self.save_state().await;
                }
                self.apply_scope(kind, &id).await
            }
        }
    }

    // ── Full convergence ─────────────────────────────────────────────

    /// Drive the backend, the admin directive, and every stored scope to
    /// match the current settings.
    pub async fn apply_doh(&self, recheck: bool) -> Result<ApplyReport, CoreError> {
        let feature_on = self.feature_on().await;
        if let Err(e) = self.converge_backend(feature_on, recheck).await {
            warn!(error = %e, feature_on, "DoH backend did not converge");
        }

        let admin = self.settings.lock().await.admin_switch;
        let admin_file = self.layout.admin_file();
        if admin {
            let line = self.layout.admin_line(&self.deps.backend.local_server());
            write_if_changed(&admin_file, &line).await?;
        } else {
            remove_if_present(&admin_file).await?;
        }

        self.apply_system().await?;

        let mut report = ApplyReport::default();
        let mut stale: Vec<(ScopeKind, String)> = Vec::new();
        for kind in ALL_KINDS {
            let entries = self.settings.lock().await.entries(kind);
            for (id, _) in entries {
                match self.scope_exists(kind, &id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(%kind, id, "scope entity gone, resetting");
                        self.settings.lock().await.set(kind, id.clone(), TriState::Unset);
                        stale.push((kind, id.clone()));
                    }
                    Err(e) => {
                        warn!(%kind, id, error = %e, "scope lookup failed");
                        report.failed += 1;
                        continue;
                    }
                }
                match self.apply_scope(kind, &id).await {
                    Ok(_) => report.applied += 1,
                    Err(e) => {
                        warn!(%kind, id, error = %e, "scope apply failed");
                        report.failed += 1;
                    }
                }
            }
        }

        // Second phase: prune only after every reset above has run.
        if !stale.is_empty() {
            let mut settings = self.settings.lock().await;
            for (kind, id) in &stale {
                if settings.get(*kind, id) != TriState::Unset {
                    continue;
                }
                settings.remove(*kind, id);
                if *kind == ScopeKind::Identity {
                    self.identity_files.remove(id);
                }
                report.pruned += 1;
            }
        }
        self.save_state().await;

        info!(
            feature_on,
            applied = report.applied,
            pruned = report.pruned,
            failed = report.failed,
            "DoH settings applied"
        );
        Ok(report)
    }

    /// Turn the feature off, unset every scope, converge, then clear the
    /// backend's server selections.
    pub async fn reset(&self) -> Result<ApplyReport, CoreError> {
        self.deps
            .features
            .set_feature(self.layout.feature(), false)
            .await?;
        self.settings.lock().await.unset_all();
        let report = self.apply_doh(false).await?;
        self.deps.backend.reset_settings().await?;
        info!("DoH reset");
        Ok(report)
    }

    pub async fn admin_start(&self) -> Result<ApplyReport, CoreError> {
        self.set_admin(true).await
    }

    pub async fn admin_stop(&self) -> Result<ApplyReport, CoreError> {
        self.set_admin(false).await
    }

    async fn set_admin(&self, on: bool) -> Result<ApplyReport, CoreError> {
        self.settings.lock().await.admin_switch = on;
        self.save_state().await;
        self.apply_doh(false).await
    }

    /// Store a server list. A change to the selected list re-converges.
    pub async fn set_servers(&self, selection: ServerSelection) -> Result<bool, CoreError> {
        let reapply = matches!(selection, ServerSelection::Selected(_));
        let changed = self.deps.backend.set_servers(selection).await?;
        if changed && reapply {
            self.apply_doh(false).await?;
        }
        Ok(changed)
    }

    pub async fn status(&self) -> DohStatus {
        let settings = self.settings().await;
        let scopes = ALL_KINDS
            .iter()
            .flat_map(|kind| {
                settings
                    .entries(*kind)
                    .into_iter()
                    .map(|(id, state)| ScopeEntry { kind: *kind, id, state })
            })
            .collect();
        DohStatus {
            feature_on: self.feature_on().await,
            admin_switch: settings.admin_switch,
            system_switch: settings.system_switch,
            selected_servers: self.deps.backend.selected_servers().await,
            customized_servers: self.deps.backend.customized_servers().await,
            all_servers: self.deps.backend.all_server_names().await,
            scopes,
        }
    }

    // ── Per-scope passes ─────────────────────────────────────────────

    async fn apply_system(&self) -> Result<Transition, CoreError> {
        let transition = if !self.feature_on().await {
            Transition::Reset
        } else if self.settings.lock().await.system_switch {
            Transition::Start
        } else {
            Transition::Stop
        };
        let target = Target {
            file: self.layout.system_file(),
            start: self.layout.system_line(Polarity::Start),
            stop: self.layout.system_line(Polarity::Stop),
        };
        self.execute(transition, &target).await?;
        debug!(?transition, "system scope applied");
        Ok(transition)
    }

    async fn apply_scope(&self, kind: ScopeKind, id: &str) -> Result<Transition, CoreError> {
        let stored = self.settings.lock().await.get(kind, id);
        let mut transition = if self.feature_on().await {
            Transition::for_state(stored)
        } else {
            Transition::Reset
        };
        if kind == ScopeKind::Network
            && transition != Transition::Reset
            && !self.deps.networks.network_exists(id).await?
        {
            debug!(network = id, "network missing, resetting instead");
            transition = Transition::Reset;
        }

        let Some(target) = self.target(kind, id).await? else {
            if transition == Transition::Reset {
                return Ok(transition);
            }
            return Err(CoreError::NotFound {
                entity_type: kind.to_string(),
                identifier: id.to_owned(),
            });
        };
        self.execute(transition, &target).await?;
        debug!(%kind, id, ?transition, "scope applied");
        Ok(transition)
    }

    async fn execute(&self, transition: Transition, target: &Target) -> Result<(), CoreError> {
        match transition {
            Transition::Start => write_if_changed(&target.file, &target.start).await?,
            Transition::Stop => write_if_changed(&target.file, &target.stop).await?,
            Transition::Reset => remove_if_present(&target.file).await?,
        };
        self.deps.restart.schedule_restart();
        Ok(())
    }

    async fn target(&self, kind: ScopeKind, id: &str) -> Result<Option<Target>, CoreError> {
        if !is_valid_id(kind, id) {
            return Err(CoreError::malformed(&format!("{kind} id"), id));
        }
        let l = &self.layout;
        let target = match kind {
            ScopeKind::Device => {
                let mac = MacAddress::parse(id)
                    .ok_or_else(|| CoreError::malformed("device id", id))?;
                Target {
                    file: l.device_file(&mac),
                    start: l.device_line(&mac, Polarity::Start),
                    stop: l.device_line(&mac, Polarity::Stop),
                }
            }
            ScopeKind::Tag => {
                let uid = TagUid::from(id);
                Target {
                    file: l.tag_file(&uid),
                    start: l.tag_line(&uid, Polarity::Start),
                    stop: l.tag_line(&uid, Polarity::Stop),
                }
            }
            ScopeKind::Network => Target {
                file: l.network_file(id),
                start: l.network_line(Polarity::Start),
                stop: l.network_line(Polarity::Stop),
            },
            ScopeKind::Identity => {
                let identity = match self.deps.identities.identity(id).await? {
                    Some(found) => {
                        self.identity_files.insert(id.to_owned(), found.clone());
                        found
                    }
                    None => match self.identity_files.get(id) {
                        Some(cached) => cached.clone(),
                        None => return Ok(None),
                    },
                };
                if !is_path_safe_id(&identity.file_prefix) {
                    return Err(CoreError::malformed("identity file prefix", &identity.file_prefix));
                }
                Target {
                    file: l.identity_file(&identity),
                    start: l.identity_line(&identity, Polarity::Start),
                    stop: l.identity_line(&identity, Polarity::Stop),
                }
            }
        };
        Ok(Some(target))
    }

    async fn scope_exists(&self, kind: ScopeKind, id: &str) -> Result<bool, CoreError> {
        match kind {
            ScopeKind::Device => Ok(true),
            ScopeKind::Tag => self.deps.tags.tag_exists(&TagUid::from(id), None).await,
            ScopeKind::Network => self.deps.networks.network_exists(id).await,
            ScopeKind::Identity => Ok(self.deps.identities.identity(id).await?.is_some()),
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    async fn feature_on(&self) -> bool {
        self.deps.features.is_on(self.layout.feature()).await
    }

    async fn converge_backend(&self, feature_on: bool, recheck: bool) -> Result<(), CoreError> {
        let backend = &self.deps.backend;
        if !feature_on {
            return backend.stop().await;
        }
        if backend.prepare_config(recheck).await? {
            backend.restart().await
        } else {
            backend.start().await
        }
    }

    async fn save_state(&self) {
        let Some(path) = &self.state_path else { return };
        let snapshot = self.settings.lock().await.clone();
        if let Err(e) = write_state(path, &snapshot).await {
            warn!(path = %path.display(), error = %e, "failed to persist DoH settings");
        }
    }
}

async fn write_state(path: &Path, settings: &ScopeSettings) -> Result<(), CoreError> {
    let body = serde_json::to_string_pretty(settings)?;
    write_if_changed(path, &body).await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::Ordering;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::model::Network;
    use crate::testing::{CountingRestart, FakeBackend, group_tag};

    struct Fixture {
        tmp: TempDir,
        dir: Arc<MemoryDirectory>,
        backend: Arc<FakeBackend>,
        restart: Arc<CountingRestart>,
        enforcer: DohEnforcer,
    }

    async fn fixture(feature_on: bool) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Arc::new(MemoryDirectory::new());
        dir.set_feature("doh", feature_on).await.unwrap();
        let backend = Arc::new(FakeBackend::default());
        let restart = Arc::new(CountingRestart::default());
        let deps = DohCollaborators {
            tags: dir.clone(),
            networks: dir.clone(),
            identities: dir.clone(),
            features: dir.clone(),
            backend: backend.clone(),
            restart: restart.clone(),
        };
        let layout = DirectiveLayout::new(tmp.path(), "doh", "wan_default");
        Fixture {
            enforcer: DohEnforcer::new(layout, deps),
            tmp,
            dir,
            backend,
            restart,
        }
    }

    fn identity(guid: &str) -> Identity {
        Identity {
            guid: guid.into(),
            uid: guid.into(),
            file_prefix: format!("vpn_{guid}"),
            group_id: format!("vpn_g_{guid}"),
        }
    }

    /// Sorted list of files under the directive directory, relative.
    fn listing(root: &Path) -> Vec<String> {
        fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(root, &path, out);
                } else {
                    out.push(path.strip_prefix(root).unwrap().display().to_string());
                }
            }
        }
        let mut out = Vec::new();
        walk(root, root, &mut out);
        out.sort();
        out
    }

    fn read(root: &Path, name: &str) -> String {
        std::fs::read_to_string(root.join(name)).unwrap()
    }

    #[tokio::test]
    async fn tri_state_mapping_per_scope_kind() {
        let f = fixture(true).await;
        f.dir.insert_tag(group_tag("7", "kids", None));
        f.dir.insert_network(Network { uuid: "n1".into(), name: None });
        f.dir.insert_identity(identity("peer1"));

        let scopes = [
            Scope::Tag(TagUid::from("7")),
            Scope::Network("n1".into()),
            Scope::Device(MacAddress::new("aa:bb:cc:dd:ee:01")),
            Scope::Identity("peer1".into()),
        ];
        for scope in &scopes {
            let (kind, id) = scope.key().unwrap();
            let cases = [
                (Some(true), TriState::Enabled, Transition::Start),
                (None, TriState::Disabled, Transition::Stop),
                (Some(false), TriState::Unset, Transition::Reset),
            ];
            for (state, stored, transition) in cases {
                let got = f
                    .enforcer
                    .apply_policy(scope, &FeaturePolicy::with_state(state))
                    .await
                    .unwrap();
                assert_eq!(got, transition, "{scope:?} {state:?}");
                assert_eq!(f.enforcer.settings().await.get(kind, &id), stored);
            }
        }
    }

    #[tokio::test]
    async fn start_and_stop_write_expected_lines() {
        let f = fixture(true).await;
        f.dir.insert_tag(group_tag("7", "kids", None));
        let root = f.tmp.path();

        f.enforcer
            .apply_policy(&Scope::Tag(TagUid::from("7")), &FeaturePolicy::with_state(Some(true)))
            .await
            .unwrap();
        assert_eq!(read(root, "tag_7_doh.conf"), "group-tag=@7$doh\n");

        f.enforcer
            .apply_policy(&Scope::Tag(TagUid::from("7")), &FeaturePolicy::with_state(None))
            .await
            .unwrap();
        assert_eq!(read(root, "tag_7_doh.conf"), "group-tag=@7$!doh\n");

        f.enforcer
            .apply_policy(&Scope::Tag(TagUid::from("7")), &FeaturePolicy::with_state(Some(false)))
            .await
            .unwrap();
        assert!(!root.join("tag_7_doh.conf").exists());
        assert_eq!(f.restart.count(), 3);
    }

    #[tokio::test]
    async fn absent_state_keeps_stored_value() {
        let f = fixture(true).await;
        let scope = Scope::Device(MacAddress::new("aa:bb:cc:dd:ee:01"));
        f.enforcer
            .apply_policy(&scope, &FeaturePolicy::with_state(Some(true)))
            .await
            .unwrap();
        let transition = f
            .enforcer
            .apply_policy(&scope, &FeaturePolicy::default())
            .await
            .unwrap();
        assert_eq!(transition, Transition::Start);
    }

    #[tokio::test]
    async fn global_policy_drives_system_file() {
        let f = fixture(true).await;
        let root = f.tmp.path();

        f.enforcer
            .apply_policy(&Scope::Global, &FeaturePolicy::with_state(Some(true)))
            .await
            .unwrap();
        assert_eq!(read(root, "doh_system.conf"), "mac-address-tag=%FF:FF:FF:FF:FF:FF$doh\n");

        // Anything but an explicit true writes the opt-out.
        f.enforcer
            .apply_policy(&Scope::Global, &FeaturePolicy::with_state(None))
            .await
            .unwrap();
        assert_eq!(read(root, "doh_system.conf"), "mac-address-tag=%FF:FF:FF:FF:FF:FF$!doh\n");
    }

    #[tokio::test]
    async fn feature_off_converges_everything_to_reset() {
        let f = fixture(true).await;
        f.dir.insert_tag(group_tag("7", "kids", None));
        f.dir.insert_network(Network { uuid: "n1".into(), name: None });
        f.dir.insert_identity(identity("peer1"));
        let on = FeaturePolicy::with_state(Some(true));
        for scope in [
            Scope::Global,
            Scope::Tag(TagUid::from("7")),
            Scope::Network("n1".into()),
            Scope::Device(MacAddress::new("aa:bb:cc:dd:ee:01")),
            Scope::Identity("peer1".into()),
        ] {
            f.enforcer.apply_policy(&scope, &on).await.unwrap();
        }
        assert_eq!(listing(f.tmp.path()).len(), 5);

        f.dir.set_feature("doh", false).await.unwrap();
        let before = f.enforcer.settings().await;
        f.enforcer.apply_doh(false).await.unwrap();

        assert!(listing(f.tmp.path()).is_empty());
        assert_eq!(f.backend.events(), vec!["stop"]);
        // Stored intent survives the gate.
        assert_eq!(f.enforcer.settings().await, before);
    }

    #[tokio::test]
    async fn feature_off_from_scratch_creates_nothing() {
        let f = fixture(false).await;
        f.dir.insert_tag(group_tag("7", "kids", None));
        f.enforcer
            .apply_policy(&Scope::Tag(TagUid::from("7")), &FeaturePolicy::with_state(Some(true)))
            .await
            .unwrap();
        f.enforcer.apply_doh(false).await.unwrap();

        assert!(listing(f.tmp.path()).is_empty());
        assert_eq!(f.backend.events(), vec!["stop"]);
    }

    #[tokio::test]
    async fn apply_doh_is_idempotent() {
        let f = fixture(true).await;
        f.dir.insert_tag(group_tag("7", "kids", None));
        f.enforcer
            .apply_policy(&Scope::Tag(TagUid::from("7")), &FeaturePolicy::with_state(Some(true)))
            .await
            .unwrap();
        f.enforcer.admin_start().await.unwrap();

        let root = f.tmp.path();
        let first: Vec<(String, String)> = listing(root)
            .into_iter()
            .map(|name| {
                let body = read(root, &name);
                (name, body)
            })
            .collect();
        let mtimes: Vec<_> = first
            .iter()
            .map(|(name, _)| std::fs::metadata(root.join(name)).unwrap().modified().unwrap())
            .collect();

        f.enforcer.apply_doh(false).await.unwrap();

        let second: Vec<(String, String)> = listing(root)
            .into_iter()
            .map(|name| {
                let body = read(root, &name);
                (name, body)
            })
            .collect();
        assert_eq!(first, second);
        for ((name, _), before) in first.iter().zip(mtimes) {
            let after = std::fs::metadata(root.join(name)).unwrap().modified().unwrap();
            assert_eq!(before, after, "{name} rewritten");
        }
    }

    #[tokio::test]
    async fn backend_restarts_only_when_config_changed() {
        let f = fixture(true).await;
        f.backend.config_changed.store(true, Ordering::SeqCst);
        f.enforcer.apply_doh(true).await.unwrap();
        f.enforcer.apply_doh(false).await.unwrap();
        assert_eq!(
            f.backend.events(),
            vec!["prepare", "restart", "prepare", "start"]
        );
    }

    #[tokio::test]
    async fn admin_switch_controls_doh_conf() {
        let f = fixture(true).await;
        let root = f.tmp.path();

        f.enforcer.admin_start().await.unwrap();
        assert_eq!(read(root, "doh.conf"), "server=127.0.0.1#8854$doh$*wan_default");

        f.enforcer.admin_stop().await.unwrap();
        assert!(!root.join("doh.conf").exists());
    }

    #[tokio::test]
    async fn deleted_tag_is_reset_then_pruned() {
        let f = fixture(true).await;
        f.dir.insert_tag(group_tag("7", "kids", None));
        let scope = Scope::Tag(TagUid::from("7"));
        f.enforcer
            .apply_policy(&scope, &FeaturePolicy::with_state(Some(true)))
            .await
            .unwrap();
        assert!(f.tmp.path().join("tag_7_doh.conf").exists());

        f.dir.remove_tag(&TagUid::from("7")).await.unwrap();
        let report = f.enforcer.apply_doh(false).await.unwrap();

        assert_eq!(report.pruned, 1);
        assert!(!f.tmp.path().join("tag_7_doh.conf").exists());
        assert!(!f.enforcer.settings().await.contains(ScopeKind::Tag, "7"));
    }

    #[tokio::test]
    async fn deleted_identity_is_reset_from_cache() {
        let f = fixture(true).await;
        f.dir.insert_identity(identity("peer1"));
        f.enforcer
            .apply_policy(
                &Scope::Identity("peer1".into()),
                &FeaturePolicy::with_state(None),
            )
            .await
            .unwrap();
        assert_eq!(
            read(f.tmp.path(), "vpn_peer1_doh.conf"),
            "group-tag=@vpn_g_peer1$!doh\n"
        );

        f.dir.remove_identity("peer1");
        let report = f.enforcer.apply_doh(false).await.unwrap();

        assert_eq!(report.pruned, 1);
        assert!(!f.tmp.path().join("vpn_peer1_doh.conf").exists());
    }

    #[tokio::test]
    async fn deleted_network_is_reset_then_pruned() {
        let f = fixture(true).await;
        f.dir.insert_network(Network { uuid: "n1".into(), name: None });
        f.enforcer
            .apply_policy(&Scope::Network("n1".into()), &FeaturePolicy::with_state(Some(true)))
            .await
            .unwrap();
        assert!(f.tmp.path().join("n1/doh_n1.conf").exists());

        f.dir.remove_network("n1");
        f.enforcer.apply_doh(false).await.unwrap();

        assert!(!f.tmp.path().join("n1/doh_n1.conf").exists());
        assert!(f.enforcer.settings().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_identity_policy_is_not_found() {
        let f = fixture(true).await;
        let result = f
            .enforcer
            .apply_policy(
                &Scope::Identity("ghost".into()),
                &FeaturePolicy::with_state(Some(true)),
            )
            .await;
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn traversal_ids_never_touch_the_filesystem() {
        let f = fixture(true).await;
        f.dir.insert_network(Network { uuid: "../escape".into(), name: None });

        for scope in [
            Scope::Network("../escape".into()),
            Scope::Tag(TagUid::from("../../7")),
            Scope::Device(MacAddress::new("../aa:bb")),
        ] {
            let result = f
                .enforcer
                .apply_policy(&scope, &FeaturePolicy::with_state(Some(true)))
                .await;
            assert!(matches!(result, Err(CoreError::Malformed { .. })), "{scope:?}");
        }

        assert!(f.enforcer.settings().await.is_empty());
        assert!(listing(f.tmp.path()).is_empty());
        assert!(!f.tmp.path().parent().unwrap().join("escape").exists());
        assert_eq!(f.restart.count(), 0);
    }

    #[tokio::test]
    async fn unsafe_identity_prefix_is_rejected() {
        let f = fixture(true).await;
        let mut peer = identity("peer1");
        peer.file_prefix = "../vpn".into();
        f.dir.insert_identity(peer);

        let result = f
            .enforcer
            .apply_policy(
                &Scope::Identity("peer1".into()),
                &FeaturePolicy::with_state(Some(true)),
            )
            .await;

        assert!(matches!(result, Err(CoreError::Malformed { .. })));
        assert!(listing(f.tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn tampered_state_file_keys_are_dropped() {
        let f = fixture(true).await;
        let state = f.tmp.path().join("state").join("doh_settings.json");
        std::fs::create_dir_all(state.parent().unwrap()).unwrap();
        std::fs::write(
            &state,
            r#"{
                "networks": { "../../../etc/dnsmasq.d": "enabled" },
                "devices": { "AA:BB:CC:DD:EE:01": "enabled" }
            }"#,
        )
        .unwrap();
        let deps = DohCollaborators {
            tags: f.dir.clone(),
            networks: f.dir.clone(),
            identities: f.dir.clone(),
            features: f.dir.clone(),
            backend: f.backend.clone(),
            restart: f.restart.clone(),
        };
        let enforcer = DohEnforcer::new(f.enforcer.layout().clone(), deps).with_state_file(&state);

        assert!(enforcer.load_state().await.unwrap());
        let settings = enforcer.settings().await;
        assert_eq!(settings.len(), 1);
        assert!(!settings.contains(ScopeKind::Network, "../../../etc/dnsmasq.d"));

        let report = enforcer.apply_doh(false).await.unwrap();
        assert_eq!(report.failed, 0);
        assert!(f.tmp.path().join("doh_AA:BB:CC:DD:EE:01.conf").exists());
    }

    #[tokio::test]
    async fn reset_runs_in_order() {
        let f = fixture(true).await;
        f.enforcer
            .apply_policy(
                &Scope::Device(MacAddress::new("aa:bb:cc:dd:ee:01")),
                &FeaturePolicy::with_state(Some(true)),
            )
            .await
            .unwrap();

        f.enforcer.reset().await.unwrap();

        assert!(!f.dir.is_on("doh").await);
        assert_eq!(f.backend.events(), vec!["stop", "reset_settings"]);
        assert!(listing(f.tmp.path()).is_empty());
        let settings = f.enforcer.settings().await;
        assert_eq!(
            settings.get(ScopeKind::Device, "AA:BB:CC:DD:EE:01"),
            TriState::Unset
        );
    }

    #[tokio::test]
    async fn selected_server_change_reapplies() {
        let f = fixture(true).await;
        let pick = ServerSelection::Selected(vec!["quad9".into()]);

        assert!(f.enforcer.set_servers(pick.clone()).await.unwrap());
        assert_eq!(f.backend.events(), vec!["prepare", "start"]);

        assert!(!f.enforcer.set_servers(pick).await.unwrap());
        assert_eq!(f.backend.events().len(), 2);

        let status = f.enforcer.status().await;
        assert!(status.feature_on);
        assert_eq!(status.selected_servers, vec!["quad9"]);
        assert_eq!(status.all_servers, vec!["cloudflare", "quad9"]);
    }

    #[tokio::test]
    async fn settings_survive_reload() {
        let f = fixture(true).await;
        let state = f.tmp.path().join("state").join("doh_settings.json");
        let layout = f.enforcer.layout().clone();
        let deps = DohCollaborators {
            tags: f.dir.clone(),
            networks: f.dir.clone(),
            identities: f.dir.clone(),
            features: f.dir.clone(),
            backend: f.backend.clone(),
            restart: f.restart.clone(),
        };
        let enforcer = DohEnforcer::new(layout.clone(), deps).with_state_file(&state);
        enforcer
            .apply_policy(
                &Scope::Device(MacAddress::new("aa:bb:cc:dd:ee:01")),
                &FeaturePolicy::with_state(None),
            )
            .await
            .unwrap();

        let deps = DohCollaborators {
            tags: f.dir.clone(),
            networks: f.dir.clone(),
            identities: f.dir.clone(),
            features: f.dir.clone(),
            backend: f.backend.clone(),
            restart: f.restart.clone(),
        };
        let reloaded = DohEnforcer::new(layout, deps).with_state_file(&state);
        assert!(reloaded.load_state().await.unwrap());
        assert_eq!(
            reloaded
                .settings()
                .await
                .get(ScopeKind::Device, "AA:BB:CC:DD:EE:01"),
            TriState::Disabled
        );
    }
}
