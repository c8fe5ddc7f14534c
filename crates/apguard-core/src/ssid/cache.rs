use std::collections::BTreeMap;

use crate::model::Tag;

/// Profile UUID -> the SSID tag mirroring it.
///
/// Only ever touched while the resolver's section lock is held.
#[derive(Debug, Default)]
pub struct ProfileCache {
    profiles: BTreeMap<String, Tag>,
}

impl ProfileCache {
    pub fn get(&self, uuid: &str) -> Option<&Tag> {
        self.profiles.get(uuid)
    }

    pub fn insert(&mut self, uuid: impl Into<String>, tag: Tag) {
        self.profiles.insert(uuid.into(), tag);
    }

    pub fn remove(&mut self, uuid: &str) -> Option<Tag> {
        self.profiles.remove(uuid)
    }

    pub fn uuids(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
