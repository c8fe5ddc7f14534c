// ── Runtime engine configuration ──
//
// Timing and layout knobs for the engine. Built by the binary from the
// loaded config file; core never reads config files itself.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the SSID full resync. Zero disables it.
    pub resync_interval: Duration,
    /// Delay before a station-join notification is processed, giving the
    /// controller time to settle the station's state.
    pub join_delay: Duration,
    /// Period of the `apply_doh(recheck = true)` sweep. Zero disables it.
    pub doh_refresh_interval: Duration,
    /// Feature flag name; also the directive file and selector stem.
    pub feature: String,
    /// dnsmasq config directory the directives live in.
    pub dnsmasq_dir: PathBuf,
    /// dnsmasq tag of the default WAN interface.
    pub wan_tag: String,
    /// Where scope settings are persisted, if anywhere.
    pub doh_state_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(60),
            join_delay: Duration::from_secs(5),
            doh_refresh_interval: Duration::from_secs(24 * 60 * 60),
            feature: "doh".into(),
            dnsmasq_dir: PathBuf::from("/etc/apguard/dnsmasq"),
            wan_tag: "wan_default".into(),
            doh_state_file: None,
        }
    }
}
