// ── In-memory directory ──
//
// One object implementing every collaborator trait, seeded from an
// inventory JSON file. Mutations are written back to that file when
// persistence is enabled, so SSID tags survive restarts.

use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::collection::Collection;
use super::{
    AddressBook, FeatureFlags, HostDirectory, IdentityDirectory, NetworkDirectory, PolicySource,
    TagDirectory,
};
use crate::error::CoreError;
use crate::model::{Host, Identity, MacAddress, Network, PolicyRule, Tag, TagKind, TagSpec, TagUid};

/// On-disk seed for [`MemoryDirectory`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub networks: Vec<Network>,
    #[serde(default)]
    pub identities: Vec<Identity>,
    #[serde(default)]
    pub policies: Vec<PolicyRule>,
    /// This appliance's own addresses; conntrack records touching them
    /// are dropped.
    #[serde(default)]
    pub local_addresses: Vec<IpAddr>,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
}

/// Directory backed by concurrent in-memory collections.
pub struct MemoryDirectory {
    tags: Collection<Tag>,
    hosts: Collection<Host>,
    networks: Collection<Network>,
    identities: Collection<Identity>,
    policies: ArcSwap<Vec<PolicyRule>>,
    local_addresses: ArcSwap<HashSet<IpAddr>>,
    features: DashMap<String, bool>,
    next_uid: AtomicU64,
    persist_path: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            tags: Collection::new(),
            hosts: Collection::new(),
            networks: Collection::new(),
            identities: Collection::new(),
            policies: ArcSwap::from_pointee(Vec::new()),
            local_addresses: ArcSwap::from_pointee(HashSet::new()),
            features: DashMap::new(),
            next_uid: AtomicU64::new(1),
            persist_path: None,
            persist_lock: Mutex::new(()),
        }
    }

    pub fn from_inventory(inventory: Inventory) -> Self {
        let dir = Self::new();
        dir.apply_inventory(inventory);
        dir
    }

    /// Load an inventory file and keep writing mutations back to it.
    /// A missing file starts an empty directory.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let inventory = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| CoreError::malformed("inventory file", e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "inventory file absent, starting empty");
                Inventory::default()
            }
            Err(e) => return Err(e.into()),
        };

        let mut dir = Self::from_inventory(inventory);
        dir.persist_path = Some(path);
        Ok(dir)
    }

    /// Replace the directory contents with `inventory`.
    pub fn apply_inventory(&self, inventory: Inventory) {
        let max_uid = inventory
            .tags
            .iter()
            .filter_map(|t| t.uid.as_str().parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        self.next_uid.fetch_max(max_uid + 1, Ordering::SeqCst);

        upsert_and_prune(
            &self.tags,
            inventory
                .tags
                .into_iter()
                .map(|t| (t.uid.to_string(), vec![tag_alias(t.kind, &t.name)], t))
                .collect(),
        );
        upsert_and_prune(
            &self.hosts,
            inventory
                .hosts
                .into_iter()
                .map(|h| (h.mac.to_string(), host_aliases(&h), h))
                .collect(),
        );
        upsert_and_prune(
            &self.networks,
            inventory
                .networks
                .into_iter()
                .map(|n| (n.uuid.clone(), Vec::new(), n))
                .collect(),
        );
        upsert_and_prune(
            &self.identities,
            inventory
                .identities
                .into_iter()
                .map(|i| (i.guid.clone(), Vec::new(), i))
                .collect(),
        );

        self.policies.store(Arc::new(inventory.policies));
        self.local_addresses
            .store(Arc::new(inventory.local_addresses.into_iter().collect()));
        self.features.clear();
        for (name, on) in inventory.features {
            self.features.insert(name, on);
        }
    }

    /// Current contents as an inventory document.
    pub fn snapshot(&self) -> Inventory {
        let mut tags: Vec<Tag> = self.tags.values().iter().map(|t| (**t).clone()).collect();
        tags.sort_by(|a, b| a.uid.cmp(&b.uid));
        let mut hosts: Vec<Host> = self.hosts.values().iter().map(|h| (**h).clone()).collect();
        hosts.sort_by(|a, b| a.mac.cmp(&b.mac));
        let mut networks: Vec<Network> =
            self.networks.values().iter().map(|n| (**n).clone()).collect();
        networks.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        let mut identities: Vec<Identity> =
            self.identities.values().iter().map(|i| (**i).clone()).collect();
        identities.sort_by(|a, b| a.guid.cmp(&b.guid));
        let mut local_addresses: Vec<IpAddr> =
            self.local_addresses.load().iter().copied().collect();
        local_addresses.sort();

        Inventory {
            tags,
            hosts,
            networks,
            identities,
            policies: self.policies.load().as_ref().clone(),
            local_addresses,
            features: self
                .features
                .iter()
                .map(|r| (r.key().clone(), *r.value()))
                .collect(),
        }
    }

    // ── Direct mutation (seeding and tests) ──────────────────────────

    pub fn insert_tag(&self, tag: Tag) {
        if let Ok(n) = tag.uid.as_str().parse::<u64>() {
            self.next_uid.fetch_max(n + 1, Ordering::SeqCst);
        }
        self.tags
            .upsert(tag.uid.to_string(), vec![tag_alias(tag.kind, &tag.name)], tag);
    }

    pub fn insert_host(&self, host: Host) {
        self.hosts
            .upsert(host.mac.to_string(), host_aliases(&host), host);
    }

    pub fn insert_network(&self, network: Network) {
        self.networks
            .upsert(network.uuid.clone(), Vec::new(), network);
    }

    pub fn remove_network(&self, uuid: &str) {
        self.networks.remove(uuid);
    }

    pub fn insert_identity(&self, identity: Identity) {
        self.identities
            .upsert(identity.guid.clone(), Vec::new(), identity);
    }

    pub fn remove_identity(&self, guid: &str) {
        self.identities.remove(guid);
    }

    pub fn set_policies(&self, policies: Vec<PolicyRule>) {
        self.policies.store(Arc::new(policies));
    }

    /// Add to the set of addresses treated as the appliance's own.
    pub fn extend_local_addresses(&self, addresses: impl IntoIterator<Item = IpAddr>) {
        let mut set = self.local_addresses.load().as_ref().clone();
        set.extend(addresses);
        self.local_addresses.store(Arc::new(set));
    }

    /// Number of host writes so far; unchanged across a no-op pass.
    pub fn host_version(&self) -> u64 {
        self.hosts.version()
    }

    pub fn tag_version(&self) -> u64 {
        self.tags.version()
    }

    pub fn tag_by_name(&self, kind: TagKind, name: &str) -> Option<Tag> {
        self.tags
            .get_by_alias(&tag_alias(kind, name))
            .map(|t| (*t).clone())
    }

    // ── Persistence ──────────────────────────────────────────────────

    async fn persist(&self) -> Result<(), CoreError> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        write_inventory(path, &self.snapshot()).await
    }
}

/// Write an inventory atomically (temp file, then rename).
pub async fn write_inventory(path: &Path, inventory: &Inventory) -> Result<(), CoreError> {
    let body = serde_json::to_string_pretty(inventory)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn tag_alias(kind: TagKind, name: &str) -> String {
    format!("{kind}:{name}")
}

fn host_aliases(host: &Host) -> Vec<String> {
    host.ipv4
        .iter()
        .map(ToString::to_string)
        .chain(host.ipv6.iter().map(ToString::to_string))
        .collect()
}

/// Upsert all incoming entities, then prune keys not in the incoming set.
fn upsert_and_prune<T: Clone + Send + Sync + 'static>(
    collection: &Collection<T>,
    items: Vec<(String, Vec<String>, T)>,
) {
    let incoming: HashSet<String> = items.iter().map(|(k, _, _)| k.clone()).collect();
    for (key, aliases, entity) in items {
        collection.upsert(key, aliases, entity);
    }
    for existing in collection.keys() {
        if !incoming.contains(&existing) {
            collection.remove(&existing);
        }
    }
}

// ── Trait impls ─────────────────────────────────────────────────────

#[async_trait]
impl TagDirectory for MemoryDirectory {
    async fn list_tags(&self, kind: TagKind) -> Result<Vec<Tag>, CoreError> {
        Ok(self
            .tags
            .values()
            .iter()
            .filter(|t| t.kind == kind)
            .map(|t| (**t).clone())
            .collect())
    }

    async fn tag(&self, uid: &TagUid) -> Result<Option<Tag>, CoreError> {
        Ok(self.tags.get(uid.as_str()).map(|t| (*t).clone()))
    }

    async fn upsert_tag(&self, spec: TagSpec) -> Result<Tag, CoreError> {
        let alias = tag_alias(spec.kind, &spec.name);
        let existing = self.tags.get_by_alias(&alias);

        let tag = match existing {
            Some(ref current) => Tag {
                user_tags: spec.user_tags,
                attrs: spec.attrs,
                ..(**current).clone()
            },
            None => Tag {
                uid: TagUid::from(self.next_uid.fetch_add(1, Ordering::SeqCst)),
                name: spec.name,
                kind: spec.kind,
                affiliated_group: None,
                user_tags: spec.user_tags,
                psk_vlan: None,
                attrs: spec.attrs,
            },
        };

        if existing.as_deref() == Some(&tag) {
            return Ok(tag);
        }

        debug!(uid = %tag.uid, name = %tag.name, kind = %tag.kind, "upserting tag");
        self.tags
            .upsert(tag.uid.to_string(), vec![alias], tag.clone());
        self.persist().await?;
        Ok(tag)
    }

    async fn remove_tag(&self, uid: &TagUid) -> Result<(), CoreError> {
        if self.tags.remove(uid.as_str()).is_some() {
            debug!(uid = %uid, "removed tag");
            self.persist().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl HostDirectory for MemoryDirectory {
    async fn host(&self, mac: &MacAddress) -> Result<Option<Host>, CoreError> {
        Ok(self.hosts.get(mac.as_str()).map(|h| (*h).clone()))
    }

    async fn set_tag_policy(
        &self,
        mac: &MacAddress,
        kind: TagKind,
        tags: Vec<TagUid>,
    ) -> Result<(), CoreError> {
        let Some(current) = self.hosts.get(mac.as_str()) else {
            return Err(CoreError::NotFound {
                entity_type: "host".into(),
                identifier: mac.to_string(),
            });
        };
        if current.tags(kind) == tags.as_slice() {
            return Ok(());
        }

        let mut host = (*current).clone();
        host.policy.insert(kind, tags);
        let aliases = host_aliases(&host);
        self.hosts.upsert(mac.to_string(), aliases, host);
        self.persist().await
    }
}

#[async_trait]
impl NetworkDirectory for MemoryDirectory {
    async fn network_exists(&self, uuid: &str) -> Result<bool, CoreError> {
        Ok(self.networks.get(uuid).is_some())
    }
}

#[async_trait]
impl IdentityDirectory for MemoryDirectory {
    async fn identity(&self, guid: &str) -> Result<Option<Identity>, CoreError> {
        Ok(self.identities.get(guid).map(|i| (*i).clone()))
    }
}

#[async_trait]
impl PolicySource for MemoryDirectory {
    async fn active_policies(&self) -> Result<Vec<PolicyRule>, CoreError> {
        Ok(self.policies.load().as_ref().clone())
    }
}

#[async_trait]
impl AddressBook for MemoryDirectory {
    fn is_local_ip(&self, ip: IpAddr) -> bool {
        self.local_addresses.load().contains(&ip)
    }

    async fn mac_by_ip(&self, ip: &str) -> Option<MacAddress> {
        self.hosts.get_by_alias(ip).map(|h| h.mac.clone())
    }
}

#[async_trait]
impl FeatureFlags for MemoryDirectory {
    async fn is_on(&self, feature: &str) -> bool {
        self.features.get(feature).is_some_and(|r| *r.value())
    }

    async fn set_feature(&self, feature: &str, on: bool) -> Result<(), CoreError> {
        let previous = self.features.insert(feature.to_owned(), on);
        if previous != Some(on) {
            debug!(feature, on, "feature flag changed");
            self.persist().await?;
        }
        Ok(())
    }
}
