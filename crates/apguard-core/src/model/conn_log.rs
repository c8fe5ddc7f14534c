use serde::{Deserialize, Serialize};

use apguard_api::Ports;

use super::MacAddress;

/// One connection-log record, in the field layout the traffic-logging
/// ingester expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnLog {
    #[serde(rename = "id.orig_h")]
    pub orig_h: String,
    #[serde(rename = "id.resp_h")]
    pub resp_h: String,
    #[serde(rename = "id.orig_p")]
    pub orig_p: Ports,
    #[serde(rename = "id.resp_p")]
    pub resp_p: Ports,
    pub proto: String,
    pub orig_bytes: u64,
    pub resp_bytes: u64,
    pub orig_pkts: u64,
    pub resp_pkts: u64,
    pub orig_ip_bytes: u64,
    pub resp_ip_bytes: u64,
    pub missed_bytes: u64,
    pub local_orig: bool,
    pub local_resp: bool,
    pub orig_l2_addr: Option<MacAddress>,
    pub resp_l2_addr: Option<MacAddress>,
    pub conn_state: String,
    pub duration: f64,
    pub ts: f64,
    pub uid: String,
    pub bridge: bool,
}
