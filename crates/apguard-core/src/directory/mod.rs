// ── Collaborator interfaces ──
//
// The engine never owns tags, hosts, networks, identities, or policies.
// It reaches them through these traits, injected at construction.

pub mod collection;
pub mod memory;

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::model::{Host, Identity, MacAddress, PolicyRule, Tag, TagKind, TagSpec, TagUid};

pub use memory::{Inventory, MemoryDirectory};

#[async_trait]
pub trait TagDirectory: Send + Sync {
    /// All tags of one kind.
    async fn list_tags(&self, kind: TagKind) -> Result<Vec<Tag>, CoreError>;

    async fn tag(&self, uid: &TagUid) -> Result<Option<Tag>, CoreError>;

    /// Create or update the tag named `spec.name` of kind `spec.kind`.
    /// An existing tag keeps its uid.
    async fn upsert_tag(&self, spec: TagSpec) -> Result<Tag, CoreError>;

    async fn remove_tag(&self, uid: &TagUid) -> Result<(), CoreError>;

    /// `true` if `uid` names a tag, optionally of a specific kind.
    async fn tag_exists(&self, uid: &TagUid, kind: Option<TagKind>) -> Result<bool, CoreError> {
        Ok(self
            .tag(uid)
            .await?
            .is_some_and(|t| kind.is_none_or(|k| t.kind == k)))
    }
}

#[async_trait]
pub trait HostDirectory: Send + Sync {
    async fn host(&self, mac: &MacAddress) -> Result<Option<Host>, CoreError>;

    /// Replace the host's tag policy of `kind`.
    async fn set_tag_policy(
        &self,
        mac: &MacAddress,
        kind: TagKind,
        tags: Vec<TagUid>,
    ) -> Result<(), CoreError>;
}

#[async_trait]
pub trait NetworkDirectory: Send + Sync {
    async fn network_exists(&self, uuid: &str) -> Result<bool, CoreError>;
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn identity(&self, guid: &str) -> Result<Option<Identity>, CoreError>;
}

#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Every rule currently active.
    async fn active_policies(&self) -> Result<Vec<PolicyRule>, CoreError>;
}

/// This appliance's own addresses, and the ARP/ND view of the LAN.
#[async_trait]
pub trait AddressBook: Send + Sync {
    fn is_local_ip(&self, ip: IpAddr) -> bool;

    async fn mac_by_ip(&self, ip: &str) -> Option<MacAddress>;
}

/// Dynamic feature switches.
#[async_trait]
pub trait FeatureFlags: Send + Sync {
    async fn is_on(&self, feature: &str) -> bool;

    async fn set_feature(&self, feature: &str, on: bool) -> Result<(), CoreError>;
}
