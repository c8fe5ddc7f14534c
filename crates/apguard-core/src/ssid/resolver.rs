// ── SSID resolver ──
//
// Keeps each station's SSID tag and device group in line with the
// controller. Every operation holds the `ssid-update` section (the
// profile cache mutex) for its whole duration, so "compute the group"
// and "write it" never interleave with a concurrent reconcile.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use apguard_api::{IdValue, StationUpdate};

use super::cache::ProfileCache;
use crate::apc::AccessPointController;
use crate::directory::{HostDirectory, TagDirectory};
use crate::error::CoreError;
use crate::model::{MacAddress, Tag, TagKind, TagSpec, TagUid};

/// A station joining an SSID profile, optionally through a PSK group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationJoin {
    pub mac: MacAddress,
    pub profile_uuid: String,
    pub psk_group: Option<TagUid>,
}

impl StationJoin {
    /// Extract a join from a station-update notification. Anything but a
    /// well-formed join yields `None`.
    pub fn from_update(update: &StationUpdate) -> Option<Self> {
        if !update.is_join() {
            return None;
        }
        let uuid = update.id.as_deref().filter(|s| !s.is_empty())?;
        let mac = update.station_mac()?;
        Some(Self {
            mac: MacAddress::new(mac),
            profile_uuid: uuid.to_owned(),
            psk_group: update
                .group_id
                .as_ref()
                .and_then(IdValue::non_empty)
                .map(TagUid::from),
        })
    }
}

/// Outcome of one profile reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileSync {
    pub upserted: usize,
    pub removed: usize,
}

/// What happened to a single station.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Assignment {
    UnknownProfile,
    UnknownHost,
    Applied { group: Option<TagUid> },
}

pub struct SsidResolver {
    section: Mutex<ProfileCache>,
    apc: Arc<dyn AccessPointController>,
    tags: Arc<dyn TagDirectory>,
    hosts: Arc<dyn HostDirectory>,
}

impl SsidResolver {
    pub fn new(
        apc: Arc<dyn AccessPointController>,
        tags: Arc<dyn TagDirectory>,
        hosts: Arc<dyn HostDirectory>,
    ) -> Self {
        Self {
            section: Mutex::new(ProfileCache::default()),
            apc,
            tags,
            hosts,
        }
    }

    /// Profile UUIDs currently cached.
    pub async fn cached_profiles(&self) -> Vec<String> {
        self.section.lock().await.uuids()
    }

    // ── Profile cache ────────────────────────────────────────────────

    /// Seed the cache from SSID tags already in the directory.
    pub async fn load_cached_profiles(&self) -> Result<usize, CoreError> {
        let mut cache = self.section.lock().await;
        for tag in self.tags.list_tags(TagKind::Ssid).await? {
            cache.insert(tag.name.clone(), tag);
        }
        debug!(profiles = cache.len(), "loaded cached ssid profiles");
        Ok(cache.len())
    }

    /// Mirror the controller's profile set onto SSID tags: profiles gone
    /// upstream lose their tag, every upstream profile is upserted.
    pub async fn reconcile_profiles(&self) -> Result<ProfileSync, CoreError> {
        let mut cache = self.section.lock().await;
        let config = self.apc.active_config().await?;
        let mut sync = ProfileSync::default();

        let stale: Vec<String> = cache
            .uuids()
            .into_iter()
            .filter(|uuid| !config.profile.contains_key(uuid))
            .collect();
        for uuid in stale {
            if let Some(tag) = cache.get(&uuid) {
                self.tags.remove_tag(&tag.uid).await?;
            }
            cache.remove(&uuid);
            sync.removed += 1;
            info!(uuid, "removed ssid profile");
        }

        for (uuid, profile) in &config.profile {
            let tag = self
                .tags
                .upsert_tag(TagSpec::ssid_profile(uuid, profile))
                .await?;
            cache.insert(uuid.clone(), tag);
            sync.upserted += 1;
        }

        debug!(upserted = sync.upserted, removed = sync.removed, "ssid profiles reconciled");
        Ok(sync)
    }

    // ── Station assignment ───────────────────────────────────────────

    pub async fn handle_station_join(&self, join: &StationJoin) -> Result<(), CoreError> {
        let cache = self.section.lock().await;
        let outcome = self
            .assign(&cache, &join.mac, &join.profile_uuid, join.psk_group.as_ref())
            .await?;
        if let Assignment::Applied { group } = outcome {
            debug!(mac = %join.mac, uuid = %join.profile_uuid, ?group, "station join applied");
        }
        Ok(())
    }

    /// Re-derive every station's assignment from the controller's station
    /// table. Returns the number of stations visited.
    pub async fn full_resync(&self) -> Result<usize, CoreError> {
        let cache = self.section.lock().await;
        let table = self.apc.station_table().await?;
        if table.is_empty() {
            return Ok(0);
        }

        let psk_groups = self.psk_group_map().await?;
        let assignments = table.assignments();
        for station in &assignments {
            let mac = MacAddress::new(&station.mac);
            let psk = station
                .psk_vlan
                .as_ref()
                .and_then(|vid| psk_groups.get(vid));
            if let Err(e) = self.assign(&cache, &mac, &station.profile_uuid, psk).await {
                warn!(error = %e, mac = %mac, "failed to resync station");
            }
        }

        debug!(stations = assignments.len(), "ssid station mapping resynced");
        Ok(assignments.len())
    }

    /// PSK VLAN id -> group tag uid, from group tags carrying a PSK VLAN.
    async fn psk_group_map(&self) -> Result<HashMap<String, TagUid>, CoreError> {
        Ok(self
            .tags
            .list_tags(TagKind::Group)
            .await?
            .into_iter()
            .filter_map(|t| t.psk_vlan.map(|vid| (vid.to_string(), t.uid)))
            .collect())
    }

    /// Set the host's SSID tag, then its device group: the SSID's
    /// affiliated user group unless already held, overridden by a valid
    /// PSK group. Identical values are not rewritten.
    async fn assign(
        &self,
        cache: &ProfileCache,
        mac: &MacAddress,
        uuid: &str,
        psk_group: Option<&TagUid>,
    ) -> Result<Assignment, CoreError> {
        let Some(profile) = cache.get(uuid) else {
            warn!(uuid, "cannot find ssid profile");
            return Ok(Assignment::UnknownProfile);
        };
        let Some(host) = self.hosts.host(mac).await? else {
            warn!(mac = %mac, "unknown mac address");
            return Ok(Assignment::UnknownHost);
        };

        let ssid_policy = vec![profile.uid.clone()];
        if host.tags(TagKind::Ssid) != ssid_policy.as_slice() {
            self.hosts
                .set_tag_policy(mac, TagKind::Ssid, ssid_policy)
                .await?;
        }

        let mut group = self
            .affiliated_group(profile)
            .await?
            .filter(|g| !host.has_tag(TagKind::Group, g));

        if let Some(psk) = psk_group {
            if self.tags.tag_exists(psk, Some(TagKind::Group)).await? {
                group = Some(psk.clone());
            }
        }

        if let Some(ref g) = group {
            let group_policy = vec![g.clone()];
            if host.tags(TagKind::Group) != group_policy.as_slice() {
                self.hosts
                    .set_tag_policy(mac, TagKind::Group, group_policy)
                    .await?;
            }
        }

        Ok(Assignment::Applied { group })
    }

    /// Device group of the first linked user tag that has one.
    async fn affiliated_group(&self, profile: &Tag) -> Result<Option<TagUid>, CoreError> {
        for uid in &profile.user_tags {
            let Some(user) = self.tags.tag(uid).await? else {
                continue;
            };
            if user.kind != TagKind::User {
                continue;
            }
            if let Some(group) = user.affiliated_group {
                return Ok(Some(group));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::model::Host;
    use crate::testing::{FakeApc, group_tag, user_tag};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const P1: &str = "539dd9d7-acaf-477c-a0ad-ed5784dd18b6";
    const MAC: &str = "4E:2F:3B:44:AD:AA";

    struct Fixture {
        dir: Arc<MemoryDirectory>,
        apc: Arc<FakeApc>,
        resolver: SsidResolver,
    }

    /// Directory with group G1 (uid 1), G2 (uid 2, PSK vlan 20), user U
    /// (uid 3) affiliated with G1, and one known host.
    async fn fixture() -> Fixture {
        let dir = Arc::new(MemoryDirectory::new());
        dir.insert_tag(group_tag("1", "G1", None));
        dir.insert_tag(group_tag("2", "G2", Some(20)));
        dir.insert_tag(user_tag("3", "alice", Some("1")));
        dir.insert_host(Host::new(MacAddress::new(MAC)));

        let apc = Arc::new(FakeApc::default());
        apc.set_profiles(json!({ P1: { "ssid": "Home", "userTags": [3] } }));

        let resolver = SsidResolver::new(apc.clone(), dir.clone(), dir.clone());
        resolver.reconcile_profiles().await.unwrap();
        Fixture { dir, apc, resolver }
    }

    fn join(psk: Option<&str>) -> StationJoin {
        StationJoin {
            mac: MacAddress::new(MAC),
            profile_uuid: P1.into(),
            psk_group: psk.map(TagUid::from),
        }
    }

    async fn host(dir: &MemoryDirectory) -> Host {
        dir.host(&MacAddress::new(MAC)).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn reconcile_creates_then_removes_profile_tag() {
        let fx = fixture().await;
        assert_eq!(fx.resolver.cached_profiles().await, vec![P1.to_owned()]);
        let tag = fx.dir.tag_by_name(TagKind::Ssid, P1).unwrap();
        assert_eq!(tag.attrs["ssid"], "Home");

        fx.apc.set_profiles(json!({}));
        let sync = fx.resolver.reconcile_profiles().await.unwrap();
        assert_eq!(sync, ProfileSync { upserted: 0, removed: 1 });
        assert!(fx.resolver.cached_profiles().await.is_empty());
        assert!(fx.dir.tag(&tag.uid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let fx = fixture().await;
        let version = fx.dir.tag_version();
        fx.resolver.reconcile_profiles().await.unwrap();
        assert_eq!(fx.dir.tag_version(), version);
    }

    #[tokio::test]
    async fn join_assigns_ssid_and_affiliated_group() {
        let fx = fixture().await;
        fx.resolver.handle_station_join(&join(None)).await.unwrap();

        let ssid_uid = fx.dir.tag_by_name(TagKind::Ssid, P1).unwrap().uid;
        let host = host(&fx.dir).await;
        assert_eq!(host.tags(TagKind::Ssid), &[ssid_uid]);
        assert_eq!(host.tags(TagKind::Group), &[TagUid::from("1")]);
    }

    #[tokio::test]
    async fn psk_group_supersedes_affiliation() {
        let fx = fixture().await;
        fx.resolver
            .handle_station_join(&join(Some("2")))
            .await
            .unwrap();
        assert_eq!(host(&fx.dir).await.tags(TagKind::Group), &[TagUid::from("2")]);
    }

    #[tokio::test]
    async fn psk_group_must_be_a_group_tag() {
        let fx = fixture().await;
        // uid 3 is a user tag, 99 does not exist
        for bogus in ["3", "99"] {
            fx.resolver
                .handle_station_join(&join(Some(bogus)))
                .await
                .unwrap();
            assert_eq!(host(&fx.dir).await.tags(TagKind::Group), &[TagUid::from("1")]);
        }
    }

    #[tokio::test]
    async fn repeated_join_writes_nothing() {
        let fx = fixture().await;
        fx.resolver.handle_station_join(&join(Some("2"))).await.unwrap();
        let version = fx.dir.host_version();

        fx.resolver.handle_station_join(&join(Some("2"))).await.unwrap();
        assert_eq!(fx.dir.host_version(), version);

        fx.resolver.handle_station_join(&join(Some("2"))).await.unwrap();
        assert_eq!(fx.dir.host_version(), version);
    }

    #[tokio::test]
    async fn unknown_profile_and_host_are_no_ops() {
        let fx = fixture().await;
        let version = fx.dir.host_version();

        let mut unknown_profile = join(None);
        unknown_profile.profile_uuid = "nope".into();
        fx.resolver.handle_station_join(&unknown_profile).await.unwrap();

        let mut unknown_host = join(None);
        unknown_host.mac = MacAddress::new("00:11:22:33:44:55");
        fx.resolver.handle_station_join(&unknown_host).await.unwrap();

        assert_eq!(fx.dir.host_version(), version);
    }

    #[tokio::test]
    async fn full_resync_matches_processed_join() {
        // Reference: the join notification is processed.
        let reference = fixture().await;
        reference
            .resolver
            .handle_station_join(&join(Some("2")))
            .await
            .unwrap();

        // Same station, join dropped, recovered via the station table.
        let fx = fixture().await;
        fx.apc.set_stations(json!({ P1: { "vlan:20": [MAC.to_lowercase()] } }));
        assert_eq!(fx.resolver.full_resync().await.unwrap(), 1);

        assert_eq!(
            host(&fx.dir).await.policy,
            host(&reference.dir).await.policy
        );
    }

    #[tokio::test]
    async fn full_resync_phy_list_uses_affiliation() {
        let fx = fixture().await;
        fx.apc.set_stations(json!({ P1: { "phy": [MAC], "vlan:77": [] } }));
        fx.resolver.full_resync().await.unwrap();
        assert_eq!(host(&fx.dir).await.tags(TagKind::Group), &[TagUid::from("1")]);
    }

    #[tokio::test]
    async fn full_resync_controller_failure_propagates() {
        let fx = fixture().await;
        fx.apc.fail_next_reads(true);
        assert!(fx.resolver.full_resync().await.is_err());
        // Lock released: subsequent calls still proceed.
        fx.apc.fail_next_reads(false);
        assert_eq!(fx.resolver.full_resync().await.unwrap(), 0);
    }

    #[test]
    fn station_join_from_update() {
        let update: StationUpdate = serde_json::from_value(json!({
            "action": "join",
            "id": P1,
            "groupId": 5,
            "station": { "macAddr": "4e:2f:3b:44:ad:aa" }
        }))
        .unwrap();
        let join = StationJoin::from_update(&update).unwrap();
        assert_eq!(join.mac.as_str(), MAC);
        assert_eq!(join.psk_group, Some(TagUid::from("5")));

        let leave: StationUpdate =
            serde_json::from_value(json!({ "action": "leave", "id": P1 })).unwrap();
        assert!(StationJoin::from_update(&leave).is_none());
    }
}
