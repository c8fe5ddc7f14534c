// ── Bus channel names ──

/// The controller applied a configuration change; SSID profiles may differ.
pub const FR_CHANGE_APPLIED: &str = "FR_CHANGE_APPLIED";

/// A station joined (or re-joined) an SSID.
pub const FWAPC_SSID_STA_UPDATE: &str = "FWAPC_SSID_STA_UPDATE";

/// A batch of conntrack records from the controller.
pub const FWAPC_CONNTRACK_UPDATE: &str = "FWAPC_CONNTRACK_UPDATE";

pub const POLICY_ENFORCEMENT: &str = "POLICY_ENFORCEMENT";

/// The policy engine finished its initial load.
pub const POLICY_ALL_INITIALIZED: &str = "POLICY_ALL_INITIALIZED";

pub const DOH_REFRESH: &str = "DOH_REFRESH";

pub const DOH_RESET: &str = "DOH_RESET";

/// `{"scope": <scope>, "policy": {"state": ...}}`. The scope is either
/// `{"kind": "device", "id": "AA:.."}` or the short form `"tag:7"`.
pub const DOH_APPLY_POLICY: &str = "DOH_APPLY_POLICY";

/// Admin master switch on.
pub const DOH_START: &str = "DOH_START";

pub const DOH_STOP: &str = "DOH_STOP";

/// `{"kind": "selected" | "customized", "servers": [...]}`.
pub const DOH_SET_SERVERS: &str = "DOH_SET_SERVERS";

/// Log a status snapshot.
pub const DOH_STATUS: &str = "DOH_STATUS";

/// Every channel the engine consumes.
pub const SUBSCRIBED: [&str; 12] = [
    FR_CHANGE_APPLIED,
    FWAPC_SSID_STA_UPDATE,
    FWAPC_CONNTRACK_UPDATE,
    POLICY_ENFORCEMENT,
    POLICY_ALL_INITIALIZED,
    DOH_REFRESH,
    DOH_RESET,
    DOH_APPLY_POLICY,
    DOH_START,
    DOH_STOP,
    DOH_SET_SERVERS,
    DOH_STATUS,
];
