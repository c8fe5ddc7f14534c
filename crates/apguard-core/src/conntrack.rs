// ── Conntrack translation ──
//
// Turns the controller's conntrack batches into connection-log records
// for the traffic-logging ingester. Traffic to or from the appliance's
// own addresses, and loopback flows, are dropped.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use apguard_api::ConntrackRecord;

use crate::directory::AddressBook;
use crate::error::CoreError;
use crate::model::{ConnLog, MacAddress};

const DEFAULT_DURATION: f64 = 1.0;
const IP_HEADER_BYTES: u64 = 20;
const BYTES_PER_PACKET: u64 = 1000;

/// Destination for translated records.
#[async_trait]
pub trait ConnLogSink: Send + Sync {
    async fn write(&self, log: &ConnLog) -> Result<(), CoreError>;
}

/// Appends one JSON object per line.
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonLinesSink {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConnLogSink for JsonLinesSink {
    async fn write(&self, log: &ConnLog) -> Result<(), CoreError> {
        let mut line = serde_json::to_vec(log)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Per-batch counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub emitted: usize,
    pub dropped: usize,
    pub failed: usize,
}

pub struct ConntrackTranslator {
    addresses: Arc<dyn AddressBook>,
    sink: Arc<dyn ConnLogSink>,
}

impl ConntrackTranslator {
    pub fn new(addresses: Arc<dyn AddressBook>, sink: Arc<dyn ConnLogSink>) -> Self {
        Self { addresses, sink }
    }

    /// Whether a record is appliance-local or loopback traffic.
    pub fn should_drop(&self, record: &ConntrackRecord) -> bool {
        if record.sh == record.dh {
            return true;
        }
        let is_local = |raw: &str| {
            raw.parse::<IpAddr>()
                .is_ok_and(|ip| self.addresses.is_local_ip(ip))
        };
        match record.af {
            4 | 6 => is_local(&record.sh) || is_local(&record.dh),
            _ => false,
        }
    }

    /// Translate and emit a batch. Sink failures are logged per record.
    pub async fn ingest(&self, batch: &[ConntrackRecord]) -> IngestReport {
        let mut report = IngestReport::default();
        for record in batch {
            if self.should_drop(record) {
                report.dropped += 1;
                continue;
            }
            let orig_mac = self.addresses.mac_by_ip(&record.sh).await;
            let resp_mac = self.addresses.mac_by_ip(&record.dh).await;
            let log = build_conn_log(record, orig_mac, resp_mac, short_uid());
            match self.sink.write(&log).await {
                Ok(()) => report.emitted += 1,
                Err(e) => {
                    warn!(src = %record.sh, dst = %record.dh, error = %e, "conn log write failed");
                    report.failed += 1;
                }
            }
        }
        debug!(
            emitted = report.emitted,
            dropped = report.dropped,
            failed = report.failed,
            "conntrack batch ingested"
        );
        report
    }
}

/// Map one conntrack record to a connection-log record.
///
/// Packet counts are estimated at one per kilobyte (at least one), and
/// IP byte counts add a 20-byte header per packet, saturating at
/// `u64::MAX`. `ts` is moved back to the start of the flow.
pub fn build_conn_log(
    record: &ConntrackRecord,
    orig_l2_addr: Option<MacAddress>,
    resp_l2_addr: Option<MacAddress>,
    uid: String,
) -> ConnLog {
    let duration = record.du.unwrap_or(DEFAULT_DURATION);
    let orig_pkts = (record.ob / BYTES_PER_PACKET).max(1);
    let resp_pkts = (record.rb / BYTES_PER_PACKET).max(1);
    ConnLog {
        orig_h: record.sh.clone(),
        resp_h: record.dh.clone(),
        orig_p: record.sp.clone(),
        resp_p: record.dp.clone(),
        proto: record.pr.clone(),
        orig_bytes: record.ob,
        resp_bytes: record.rb,
        orig_pkts,
        resp_pkts,
        orig_ip_bytes: record.ob.saturating_add(IP_HEADER_BYTES.saturating_mul(orig_pkts)),
        resp_ip_bytes: record.rb.saturating_add(IP_HEADER_BYTES.saturating_mul(resp_pkts)),
        missed_bytes: 0,
        local_orig: true,
        local_resp: true,
        orig_l2_addr,
        resp_l2_addr,
        conn_state: "SF".to_owned(),
        duration,
        ts: record.ts - duration,
        uid,
        bridge: true,
    }
}

/// Eight hex characters of a random v4 UUID.
pub fn short_uid() -> String {
    let mut uid = uuid::Uuid::new_v4().simple().to_string();
    uid.truncate(8);
    uid
}
