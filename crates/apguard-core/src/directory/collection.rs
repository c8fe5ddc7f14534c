// ── Concurrent keyed collection ──
//
// DashMap storage with a secondary alias index and a version counter
// that moves on every mutation. The version lets callers (and tests)
// tell whether a pass actually wrote anything.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A concurrent collection for one entity type.
pub(crate) struct Collection<T: Clone + Send + Sync + 'static> {
    /// Primary storage: key -> entity.
    by_key: DashMap<String, Arc<T>>,

    /// Secondary index: alias -> key. Tags alias `kind:name`, hosts alias
    /// each of their IP addresses.
    alias_to_key: DashMap<String, String>,

    /// Reverse of `alias_to_key` for cleanup on update/removal.
    key_to_aliases: DashMap<String, Vec<String>>,

    /// Bumped on every mutation.
    version: watch::Sender<u64>,
}

impl<T: Clone + Send + Sync + 'static> Collection<T> {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            by_key: DashMap::new(),
            alias_to_key: DashMap::new(),
            key_to_aliases: DashMap::new(),
            version,
        }
    }

    /// Insert or update an entity. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: String, aliases: Vec<String>, entity: T) -> bool {
        self.drop_aliases(&key);

        let is_new = !self.by_key.contains_key(&key);
        self.by_key.insert(key.clone(), Arc::new(entity));
        for alias in &aliases {
            self.alias_to_key.insert(alias.clone(), key.clone());
        }
        self.key_to_aliases.insert(key, aliases);

        self.bump_version();
        is_new
    }

    /// Remove an entity by key. Returns the removed entity if it existed.
    pub(crate) fn remove(&self, key: &str) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.drop_aliases(key);
            self.bump_version();
        }
        removed
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn get_by_alias(&self, alias: &str) -> Option<Arc<T>> {
        let key = self.alias_to_key.get(alias)?;
        self.by_key
            .get(key.value().as_str())
            .map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn values(&self) -> Vec<Arc<T>> {
        self.by_key.iter().map(|r| Arc::clone(r.value())).collect()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.by_key.iter().map(|r| r.key().clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn drop_aliases(&self, key: &str) {
        if let Some((_, aliases)) = self.key_to_aliases.remove(key) {
            for alias in aliases {
                // Only drop the alias if it still points at this key.
                self.alias_to_key.remove_if(&alias, |_, k| k == key);
            }
        }
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}
