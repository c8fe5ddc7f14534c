// ── dnsmasq directive grammar ──
//
// One file per scope entry, one selector line per file. Start and Stop
// differ only in selector polarity (`$doh` vs `$!doh`); Reset deletes
// the file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::model::{Identity, MacAddress, TagUid};

/// Which polarity a directive line carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Opt in: `$<feature>`.
    Start,
    /// Explicit opt out: `$!<feature>`.
    Stop,
}

const SYSTEM_SELECTOR: &str = "mac-address-tag=%FF:FF:FF:FF:FF:FF";
const NETWORK_SELECTOR: &str = "mac-address-tag=%00:00:00:00:00:00";

/// File names and directive lines for one feature under one dnsmasq
/// config directory.
#[derive(Debug, Clone)]
pub struct DirectiveLayout {
    dir: PathBuf,
    feature: String,
    wan_tag: String,
}

impl DirectiveLayout {
    pub fn new(dir: impl Into<PathBuf>, feature: impl Into<String>, wan_tag: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            feature: feature.into(),
            wan_tag: wan_tag.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    fn line(&self, selector: &str, polarity: Polarity) -> String {
        let feature = &self.feature;
        match polarity {
            Polarity::Start => format!("{selector}${feature}\n"),
            Polarity::Stop => format!("{selector}$!{feature}\n"),
        }
    }

    // ── Admin ────────────────────────────────────────────────────────

    pub fn admin_file(&self) -> PathBuf {
        self.dir.join(format!("{}.conf", self.feature))
    }

    /// Route feature-tagged queries to the local DoH proxy, on the
    /// default WAN only.
    pub fn admin_line(&self, local_server: &str) -> String {
        format!("server={local_server}${}$*{}", self.feature, self.wan_tag)
    }

    // ── Per scope ────────────────────────────────────────────────────

    pub fn system_file(&self) -> PathBuf {
        self.dir.join(format!("{}_system.conf", self.feature))
    }

    pub fn system_line(&self, polarity: Polarity) -> String {
        self.line(SYSTEM_SELECTOR, polarity)
    }

    pub fn tag_file(&self, uid: &TagUid) -> PathBuf {
        self.dir.join(format!("tag_{uid}_{}.conf", self.feature))
    }

    pub fn tag_line(&self, uid: &TagUid, polarity: Polarity) -> String {
        self.line(&format!("group-tag=@{uid}"), polarity)
    }

    /// Networks keep their directives in a per-network subdirectory.
    pub fn network_file(&self, uuid: &str) -> PathBuf {
        self.dir
            .join(uuid)
            .join(format!("{}_{uuid}.conf", self.feature))
    }

    pub fn network_line(&self, polarity: Polarity) -> String {
        self.line(NETWORK_SELECTOR, polarity)
    }

    pub fn device_file(&self, mac: &MacAddress) -> PathBuf {
        self.dir.join(format!("{}_{mac}.conf", self.feature))
    }

    pub fn device_line(&self, mac: &MacAddress, polarity: Polarity) -> String {
        self.line(&format!("mac-address-tag=%{mac}"), polarity)
    }

    pub fn identity_file(&self, identity: &Identity) -> PathBuf {
        self.dir
            .join(format!("{}_{}.conf", identity.file_prefix, self.feature))
    }

    pub fn identity_line(&self, identity: &Identity, polarity: Polarity) -> String {
        self.line(&format!("group-tag=@{}", identity.group_id), polarity)
    }
}

// ── File I/O ────────────────────────────────────────────────────────

/// Write `content` unless the file already holds exactly that.
/// Returns `true` if the file was written.
pub async fn write_if_changed(path: &Path, content: &str) -> std::io::Result<bool> {
    match tokio::fs::read_to_string(path).await {
        Ok(existing) if existing == content => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(true)
}

/// Delete the file; a missing file is fine. Returns `true` if removed.
pub async fn remove_if_present(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
