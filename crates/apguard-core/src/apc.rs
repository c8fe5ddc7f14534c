// ── Access-point controller seam ──
//
// The resolver and rule forwarder talk to the controller through this
// trait; `ApcClient` is the production implementation.

use async_trait::async_trait;

use apguard_api::{ApcClient, ApcConfig, StationTable};

use crate::error::CoreError;
use crate::model::PolicyRule;

#[async_trait]
pub trait AccessPointController: Send + Sync {
    /// Active configuration, including the SSID profile map.
    async fn active_config(&self) -> Result<ApcConfig, CoreError>;

    /// Complete station-to-SSID mapping.
    async fn station_table(&self) -> Result<StationTable, CoreError>;

    async fn upsert_rule(&self, pid: &str, rule: &PolicyRule) -> Result<(), CoreError>;

    /// Upload a rule batch; with `replace`, drop everything else upstream.
    async fn upsert_rules(&self, rules: &[PolicyRule], replace: bool) -> Result<(), CoreError>;

    async fn delete_rule(&self, pid: &str) -> Result<(), CoreError>;
}

#[async_trait]
impl AccessPointController for ApcClient {
    async fn active_config(&self) -> Result<ApcConfig, CoreError> {
        Ok(self.get_config().await?)
    }

    async fn station_table(&self) -> Result<StationTable, CoreError> {
        Ok(self.get_all_ssid_status().await?)
    }

    async fn upsert_rule(&self, pid: &str, rule: &PolicyRule) -> Result<(), CoreError> {
        Ok(self.update_rule(pid, rule).await?)
    }

    async fn upsert_rules(&self, rules: &[PolicyRule], replace: bool) -> Result<(), CoreError> {
        Ok(self.update_rules(rules, replace).await?)
    }

    async fn delete_rule(&self, pid: &str) -> Result<(), CoreError> {
        Ok(ApcClient::delete_rule(self, pid).await?)
    }
}
