// ── DoH proxy backend ──
//
// The DNS-encryption proxy that dnsmasq forwards feature-tagged queries
// to. The enforcer only starts, stops, and reconfigures it; the proxy's
// own query handling is out of reach.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::directive::{remove_if_present, write_if_changed};
use crate::error::CoreError;

/// A user-supplied upstream server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DohServer {
    pub name: String,
    /// DNS stamp (`sdns://...`).
    pub stamp: String,
}

/// Which server list a `set_servers` call replaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "servers", rename_all = "lowercase")]
pub enum ServerSelection {
    /// Names picked from the proxy's public resolver list.
    Selected(Vec<String>),
    /// Servers defined by stamp.
    Customized(Vec<DohServer>),
}

#[async_trait]
pub trait DohBackend: Send + Sync {
    async fn start(&self) -> Result<(), CoreError>;

    async fn stop(&self) -> Result<(), CoreError>;

    async fn restart(&self) -> Result<(), CoreError>;

    /// Render the proxy configuration. Returns `true` if it changed and
    /// the proxy needs a restart. With `recheck`, compare against the
    /// file on disk rather than the last rendering.
    async fn prepare_config(&self, recheck: bool) -> Result<bool, CoreError>;

    /// Forget every server selection.
    async fn reset_settings(&self) -> Result<(), CoreError>;

    /// dnsmasq `server=` address of the proxy (`ip#port`).
    fn local_server(&self) -> String;

    async fn selected_servers(&self) -> Vec<String>;

    async fn customized_servers(&self) -> Vec<DohServer>;

    async fn all_server_names(&self) -> Vec<String>;

    /// Store a server list. Returns `true` if it differs from the
    /// stored one.
    async fn set_servers(&self, selection: ServerSelection) -> Result<bool, CoreError>;
}

/// Asks the DNS service to restart. Implementations coalesce bursts.
pub trait RestartScheduler: Send + Sync {
    fn schedule_restart(&self);
}

// ── Process-driven backend ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProcessBackendConfig {
    /// Rendered proxy configuration (TOML).
    pub config_path: PathBuf,
    /// Persisted server selections (JSON).
    pub state_path: PathBuf,
    pub listen: SocketAddr,
    /// Used when nothing is selected.
    pub default_servers: Vec<String>,
    /// Names offered for selection.
    pub known_servers: Vec<String>,
    pub start_command: Vec<String>,
    pub stop_command: Vec<String>,
    pub restart_command: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ServerState {
    #[serde(default)]
    selected: Vec<String>,
    #[serde(default)]
    customized: Vec<DohServer>,
}

#[derive(Serialize)]
struct ProxyConfig<'a> {
    listen_addresses: Vec<String>,
    server_names: Vec<&'a str>,
    #[serde(rename = "static", skip_serializing_if = "BTreeMap::is_empty")]
    statics: BTreeMap<&'a str, StaticServer<'a>>,
}

#[derive(Serialize)]
struct StaticServer<'a> {
    stamp: &'a str,
}

/// Drives the proxy through shell commands and a rendered TOML file.
pub struct ProcessBackend {
    config: ProcessBackendConfig,
    state: ArcSwap<ServerState>,
    last_rendered: ArcSwap<Option<String>>,
}

impl ProcessBackend {
    /// Build the backend, restoring persisted server selections.
    pub async fn load(config: ProcessBackendConfig) -> Result<Self, CoreError> {
        let state = match tokio::fs::read_to_string(&config.state_path).await {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| CoreError::malformed("DoH server state", e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ServerState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            config,
            state: ArcSwap::from_pointee(state),
            last_rendered: ArcSwap::from_pointee(None),
        })
    }

    /// The proxy configuration for the current selections.
    pub fn render(&self) -> Result<String, CoreError> {
        let state = self.state.load();
        let mut names: Vec<&str> = if state.selected.is_empty() {
            self.config.default_servers.iter().map(String::as_str).collect()
        } else {
            state.selected.iter().map(String::as_str).collect()
        };
        names.extend(state.customized.iter().map(|s| s.name.as_str()));

        let doc = ProxyConfig {
            listen_addresses: vec![self.config.listen.to_string()],
            server_names: names,
            statics: state
                .customized
                .iter()
                .map(|s| (s.name.as_str(), StaticServer { stamp: &s.stamp }))
                .collect(),
        };
        toml::to_string(&doc).map_err(CoreError::backend)
    }

    async fn persist_state(&self, state: &ServerState) -> Result<(), CoreError> {
        let body = serde_json::to_string_pretty(state)?;
        write_if_changed(&self.config.state_path, &body).await?;
        Ok(())
    }
}

#[async_trait]
impl DohBackend for ProcessBackend {
    async fn start(&self) -> Result<(), CoreError> {
        run_command(&self.config.start_command).await
    }

    async fn stop(&self) -> Result<(), CoreError> {
        run_command(&self.config.stop_command).await
    }

    async fn restart(&self) -> Result<(), CoreError> {
        run_command(&self.config.restart_command).await
    }

    async fn prepare_config(&self, recheck: bool) -> Result<bool, CoreError> {
        let rendered = self.render()?;
        if !recheck && self.last_rendered.load().as_deref() == Some(rendered.as_str()) {
            return Ok(false);
        }
        let changed = write_if_changed(&self.config.config_path, &rendered).await?;
        self.last_rendered.store(Arc::new(Some(rendered)));
        if changed {
            info!(path = %self.config.config_path.display(), "DoH proxy configuration updated");
        }
        Ok(changed)
    }

    async fn reset_settings(&self) -> Result<(), CoreError> {
        self.state.store(Arc::new(ServerState::default()));
        self.last_rendered.store(Arc::new(None));
        remove_if_present(&self.config.state_path).await?;
        Ok(())
    }

    fn local_server(&self) -> String {
        format!("{}#{}", self.config.listen.ip(), self.config.listen.port())
    }

    async fn selected_servers(&self) -> Vec<String> {
        self.state.load().selected.clone()
    }

    async fn customized_servers(&self) -> Vec<DohServer> {
        self.state.load().customized.clone()
    }

    async fn all_server_names(&self) -> Vec<String> {
        let mut names = self.config.known_servers.clone();
        for server in &self.state.load().customized {
            if !names.contains(&server.name) {
                names.push(server.name.clone());
            }
        }
        names
    }

    async fn set_servers(&self, selection: ServerSelection) -> Result<bool, CoreError> {
        let current = self.state.load_full();
        let mut next = (*current).clone();
        match selection {
            ServerSelection::Selected(names) => next.selected = names,
            ServerSelection::Customized(servers) => next.customized = servers,
        }
        if next == *current {
            return Ok(false);
        }
        self.persist_state(&next).await?;
        self.state.store(Arc::new(next));
        Ok(true)
    }
}

/// Run `argv`, failing on a non-zero exit. An empty command is a no-op.
pub(crate) async fn run_command(argv: &[String]) -> Result<(), CoreError> {
    let Some((program, args)) = argv.split_first() else {
        debug!("no command configured, skipping");
        return Ok(());
    };
    debug!(program, ?args, "running backend command");
    let status = tokio::process::Command::new(program)
        .args(args)
        .status()
        .await
        .map_err(|e| CoreError::backend(format!("failed to run {program}: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(CoreError::backend(format!("{program} exited with {status}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> ProcessBackendConfig {
        ProcessBackendConfig {
            config_path: dir.join("dnscrypt.toml"),
            state_path: dir.join("doh_servers.json"),
            listen: "127.0.0.1:8854".parse().unwrap(),
            default_servers: vec!["cloudflare".into()],
            known_servers: vec!["cloudflare".into(), "quad9".into()],
            start_command: Vec::new(),
            stop_command: Vec::new(),
            restart_command: Vec::new(),
        }
    }

    #[tokio::test]
    async fn local_server_uses_dnsmasq_notation() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = ProcessBackend::load(config(tmp.path())).await.unwrap();
        assert_eq!(backend.local_server(), "127.0.0.1#8854");
    }

    #[tokio::test]
    async fn prepare_config_reports_changes_once() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = ProcessBackend::load(config(tmp.path())).await.unwrap();

        assert!(backend.prepare_config(false).await.unwrap());
        assert!(!backend.prepare_config(false).await.unwrap());
        assert!(!backend.prepare_config(true).await.unwrap());

        // External edit is only noticed on recheck.
        tokio::fs::write(tmp.path().join("dnscrypt.toml"), "tampered")
            .await
            .unwrap();
        assert!(!backend.prepare_config(false).await.unwrap());
        assert!(backend.prepare_config(true).await.unwrap());
    }

    #[tokio::test]
    async fn render_includes_customized_stamps() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = ProcessBackend::load(config(tmp.path())).await.unwrap();
        backend
            .set_servers(ServerSelection::Customized(vec![DohServer {
                name: "home".into(),
                stamp: "sdns://AgcAAAAAAAAA".into(),
            }]))
            .await
            .unwrap();

        let rendered: toml::Value = toml::from_str(&backend.render().unwrap()).unwrap();
        let names: Vec<&str> = rendered["server_names"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["cloudflare", "home"]);
        assert_eq!(rendered["static"]["home"]["stamp"].as_str(), Some("sdns://AgcAAAAAAAAA"));
        assert_eq!(backend.all_server_names().await, vec!["cloudflare", "quad9", "home"]);
    }

    #[tokio::test]
    async fn selections_persist_and_reset() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = ProcessBackend::load(config(tmp.path())).await.unwrap();
        let pick = ServerSelection::Selected(vec!["quad9".into()]);
        assert!(backend.set_servers(pick.clone()).await.unwrap());
        assert!(!backend.set_servers(pick).await.unwrap());

        let reloaded = ProcessBackend::load(config(tmp.path())).await.unwrap();
        assert_eq!(reloaded.selected_servers().await, vec!["quad9"]);

        reloaded.reset_settings().await.unwrap();
        assert!(reloaded.selected_servers().await.is_empty());
        assert!(!tmp.path().join("doh_servers.json").exists());
    }

    #[tokio::test]
    async fn failing_command_is_backend_error() {
        let result = run_command(&["false".to_owned()]).await;
        assert!(matches!(result, Err(CoreError::Backend { .. })));
        run_command(&[]).await.unwrap();
    }
}
