// ── Engine ──
//
// Owns the resolver, the DoH enforcer, the rule forwarder, and the
// conntrack translator, and wires them to their triggers: bus
// notifications, interval timers, and the admin command channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use apguard_api::{BusMessage, ConntrackRecord, StationUpdate};

use crate::apc::AccessPointController;
use crate::channels;
use crate::command::{Command, CommandEnvelope, CommandResult};
use crate::config::EngineConfig;
use crate::conntrack::{ConnLogSink, ConntrackTranslator};
use crate::directory::{
    AddressBook, FeatureFlags, HostDirectory, IdentityDirectory, MemoryDirectory,
    NetworkDirectory, PolicySource, TagDirectory,
};
use crate::doh::{
    DirectiveLayout, DohBackend, DohCollaborators, DohEnforcer, RestartScheduler, ServerSelection,
};
use crate::error::CoreError;
use crate::model::{EnforcementEvent, FeaturePolicy, Scope};
use crate::rules::RuleForwarder;
use crate::ssid::{SsidResolver, StationJoin};

const COMMAND_CHANNEL_SIZE: usize = 64;

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running { since: DateTime<Utc> },
}

/// Every external system the engine talks to.
pub struct Collaborators {
    pub apc: Arc<dyn AccessPointController>,
    pub tags: Arc<dyn TagDirectory>,
    pub hosts: Arc<dyn HostDirectory>,
    pub networks: Arc<dyn NetworkDirectory>,
    pub identities: Arc<dyn IdentityDirectory>,
    pub policies: Arc<dyn PolicySource>,
    pub features: Arc<dyn FeatureFlags>,
    pub addresses: Arc<dyn AddressBook>,
    pub backend: Arc<dyn DohBackend>,
    pub restart: Arc<dyn RestartScheduler>,
    pub conn_log: Arc<dyn ConnLogSink>,
}

impl Collaborators {
    /// Use one in-memory directory for every directory role.
    pub fn with_directory(
        directory: &Arc<MemoryDirectory>,
        apc: Arc<dyn AccessPointController>,
        backend: Arc<dyn DohBackend>,
        restart: Arc<dyn RestartScheduler>,
        conn_log: Arc<dyn ConnLogSink>,
    ) -> Self {
        Self {
            apc,
            tags: directory.clone(),
            hosts: directory.clone(),
            networks: directory.clone(),
            identities: directory.clone(),
            policies: directory.clone(),
            features: directory.clone(),
            addresses: directory.clone(),
            backend,
            restart,
            conn_log,
        }
    }
}

/// The main entry point.
///
/// Cheaply cloneable via `Arc<EngineInner>`. [`start()`](Self::start)
/// runs the startup sequence and spawns the background tasks;
/// [`execute()`](Self::execute) routes admin commands through the
/// command processor.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    resolver: SsidResolver,
    enforcer: DohEnforcer,
    forwarder: RuleForwarder,
    translator: ConntrackTranslator,
    state: watch::Sender<EngineState>,
    command_tx: mpsc::Sender<CommandEnvelope>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Build the engine. Does NOT start it.
    pub fn new(config: EngineConfig, parts: Collaborators) -> Self {
        let resolver = SsidResolver::new(parts.apc.clone(), parts.tags.clone(), parts.hosts);
        let layout = DirectiveLayout::new(&config.dnsmasq_dir, &config.feature, &config.wan_tag);
        let mut enforcer = DohEnforcer::new(
            layout,
            DohCollaborators {
                tags: parts.tags,
                networks: parts.networks,
                identities: parts.identities,
                features: parts.features,
                backend: parts.backend,
                restart: parts.restart,
            },
        );
        if let Some(path) = &config.doh_state_file {
            enforcer = enforcer.with_state_file(path);
        }
        let forwarder = RuleForwarder::new(parts.apc, parts.policies);
        let translator = ConntrackTranslator::new(parts.addresses, parts.conn_log);

        let (state, _) = watch::channel(EngineState::Stopped);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        Self {
            inner: Arc::new(EngineInner {
                config,
                resolver,
                enforcer,
                forwarder,
                translator,
                state,
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn resolver(&self) -> &SsidResolver {
        &self.inner.resolver
    }

    pub fn enforcer(&self) -> &DohEnforcer {
        &self.inner.enforcer
    }

    pub fn state(&self) -> watch::Receiver<EngineState> {
        self.inner.state.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Run the startup sequence, then spawn the command processor, the
    /// timers, and the bus listener.
    ///
    /// Startup steps that fail are logged; the periodic tasks converge
    /// later.
    pub async fn start(&self, bus: broadcast::Receiver<Arc<BusMessage>>) -> Result<(), CoreError> {
        let Some(command_rx) = self.inner.command_rx.lock().await.take() else {
            return Err(CoreError::Internal("engine already started".into()));
        };
        self.inner.state.send_replace(EngineState::Starting);

        let inner = &self.inner;
        if let Err(e) = inner.enforcer.load_state().await {
            warn!(error = %e, "could not restore DoH settings");
        }
        if let Err(e) = inner.resolver.load_cached_profiles().await {
            warn!(error = %e, "could not load cached ssid profiles");
        }
        if let Err(e) = inner.resolver.reconcile_profiles().await {
            warn!(error = %e, "initial profile reconcile failed");
        }
        if let Err(e) = inner.resolver.full_resync().await {
            warn!(error = %e, "initial ssid resync failed");
        }
        if let Err(e) = inner.enforcer.apply_doh(false).await {
            warn!(error = %e, "initial DoH apply failed");
        }

        let cancel = inner.cancel.clone();
        let mut handles = inner.task_handles.lock().await;
        handles.push(tokio::spawn(command_processor_task(self.clone(), command_rx)));

        let resync = inner.config.resync_interval;
        if !resync.is_zero() {
            handles.push(tokio::spawn(resync_task(self.clone(), resync, cancel.clone())));
        }

        let refresh = inner.config.doh_refresh_interval;
        if !refresh.is_zero() {
            handles.push(tokio::spawn(doh_refresh_task(self.clone(), refresh, cancel.clone())));
        }

        handles.push(tokio::spawn(bus_task(self.clone(), bus, cancel)));

        inner.state.send_replace(EngineState::Running { since: Utc::now() });
        info!("engine started");
        Ok(())
    }

    /// Cancel every background task and wait for them to exit.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles = std::mem::take(&mut *self.inner.task_handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
        self.inner.state.send_replace(EngineState::Stopped);
        info!("engine stopped");
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Execute a command through the command processor.
    pub async fn execute(&self, cmd: Command) -> Result<CommandResult, CoreError> {
        if !matches!(*self.inner.state.borrow(), EngineState::Running { .. }) {
            return Err(CoreError::EngineStopped);
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.inner
            .command_tx
            .send(CommandEnvelope {
                command: cmd,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::EngineStopped)?;

        rx.await.map_err(|_| CoreError::EngineStopped)?
    }

    // ── Bus dispatch ─────────────────────────────────────────────────

    /// React to one bus notification. Never fails: errors are logged.
    pub async fn handle_message(&self, msg: &BusMessage) {
        let inner = &self.inner;
        match msg.channel.as_str() {
            channels::FR_CHANGE_APPLIED => match inner.resolver.reconcile_profiles().await {
                Ok(sync) => debug!(?sync, "profiles reconciled after config change"),
                Err(e) => warn!(error = %e, "profile reconcile failed"),
            },
            channels::FWAPC_SSID_STA_UPDATE => self.schedule_join(msg.message.clone()).await,
            channels::FWAPC_CONNTRACK_UPDATE => {
                if let Some(batch) = parse::<Vec<ConntrackRecord>>(&msg.channel, &msg.message) {
                    inner.translator.ingest(&batch).await;
                }
            }
            channels::POLICY_ENFORCEMENT => {
                if let Some(event) = parse::<EnforcementEvent>(&msg.channel, &msg.message) {
                    if let Err(e) = inner.forwarder.handle_enforcement(&event).await {
                        warn!(error = %e, action = %event.action, "rule forwarding failed");
                    }
                }
            }
            channels::POLICY_ALL_INITIALIZED => {
                if let Err(e) = inner.forwarder.sync_all().await {
                    warn!(error = %e, "bulk rule sync failed");
                }
            }
            channels::DOH_REFRESH => self.execute_logged(Command::RefreshDoh { recheck: false }).await,
            channels::DOH_RESET => self.execute_logged(Command::ResetDoh).await,
            channels::DOH_APPLY_POLICY => {
                let Some(request) = parse::<PolicyRequest>(&msg.channel, &msg.message) else {
                    return;
                };
                let Some(scope) = request.scope.resolve() else {
                    warn!(channel = %msg.channel, "dropping policy for an invalid scope");
                    return;
                };
                self.execute_logged(Command::ApplyPolicy {
                    scope,
                    policy: request.policy,
                })
                .await;
            }
            channels::DOH_START => self.execute_logged(Command::AdminStart).await,
            channels::DOH_STOP => self.execute_logged(Command::AdminStop).await,
            channels::DOH_SET_SERVERS => {
                if let Some(selection) = parse::<ServerSelection>(&msg.channel, &msg.message) {
                    self.execute_logged(Command::SetServers(selection)).await;
                }
            }
            channels::DOH_STATUS => match self.execute(Command::DohStatus).await {
                Ok(CommandResult::Status(status)) => info!(
                    feature_on = status.feature_on,
                    admin_switch = status.admin_switch,
                    system_switch = status.system_switch,
                    selected = ?status.selected_servers,
                    scopes = status.scopes.len(),
                    "DoH status"
                ),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "DoH status failed"),
            },
            other => debug!(channel = other, "ignoring bus message"),
        }
    }

    /// Station joins settle on the controller side first; process the
    /// payload after `join_delay`.
    async fn schedule_join(&self, payload: String) {
        let engine = self.clone();
        let delay = self.inner.config.join_delay;
        let cancel = self.inner.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            let Some(update) = parse::<StationUpdate>(channels::FWAPC_SSID_STA_UPDATE, &payload)
            else {
                return;
            };
            let Some(join) = StationJoin::from_update(&update) else {
                debug!(action = %update.action, "station update is not a join");
                return;
            };
            if let Err(e) = engine.inner.resolver.handle_station_join(&join).await {
                warn!(mac = %join.mac, error = %e, "station join failed");
            }
        });

        let mut handles = self.inner.task_handles.lock().await;
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    async fn execute_logged(&self, cmd: Command) {
        if let Err(e) = self.execute(cmd).await {
            warn!(error = %e, "bus-triggered command failed");
        }
    }
}

/// Policy delivered over the bus.
#[derive(Debug, Deserialize)]
struct PolicyRequest {
    scope: ScopeRef,
    #[serde(default)]
    policy: FeaturePolicy,
}

/// Either the tagged form or the `<kind>:<id>` short form.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScopeRef {
    Tagged(Scope),
    Short(String),
}

impl ScopeRef {
    fn resolve(self) -> Option<Scope> {
        match self {
            Self::Tagged(scope) => scope.is_valid().then_some(scope),
            Self::Short(raw) => Scope::parse(&raw),
        }
    }
}

fn parse<T: DeserializeOwned>(channel: &str, payload: &str) -> Option<T> {
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(channel, error = %e, "dropping malformed bus payload");
            None
        }
    }
}

// ── Background tasks ────────────────────────────────────────────────

async fn command_processor_task(engine: Engine, mut rx: mpsc::Receiver<CommandEnvelope>) {
    let cancel = engine.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let result = route_command(&engine, envelope.command).await;
                let _ = envelope.response_tx.send(result);
            }
        }
    }
}

async fn route_command(engine: &Engine, cmd: Command) -> Result<CommandResult, CoreError> {
    let inner = &engine.inner;
    debug!(?cmd, "executing command");
    match cmd {
        Command::ApplyPolicy { scope, policy } => inner
            .enforcer
            .apply_policy(&scope, &policy)
            .await
            .map(CommandResult::Transition),
        Command::RefreshDoh { recheck } => inner
            .enforcer
            .apply_doh(recheck)
            .await
            .map(CommandResult::Applied),
        Command::ResetDoh => inner.enforcer.reset().await.map(CommandResult::Applied),
        Command::AdminStart => inner.enforcer.admin_start().await.map(CommandResult::Applied),
        Command::AdminStop => inner.enforcer.admin_stop().await.map(CommandResult::Applied),
        Command::SetServers(selection) => inner
            .enforcer
            .set_servers(selection)
            .await
            .map(CommandResult::ServersChanged),
        Command::DohStatus => Ok(CommandResult::Status(Box::new(
            inner.enforcer.status().await,
        ))),
        Command::ReconcileProfiles => inner
            .resolver
            .reconcile_profiles()
            .await
            .map(CommandResult::ProfilesSynced),
        Command::FullResync => inner.resolver.full_resync().await.map(CommandResult::Resynced),
        Command::SyncRules => inner.forwarder.sync_all().await.map(CommandResult::RulesSynced),
    }
}

/// Periodic SSID full resync; recovers from dropped join notifications.
async fn resync_task(engine: Engine, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                match engine.inner.resolver.full_resync().await {
                    Ok(count) => debug!(count, "periodic ssid resync"),
                    Err(e) => warn!(error = %e, "periodic ssid resync failed"),
                }
            }
        }
    }
}

/// Periodic `apply_doh(recheck = true)`, catching external edits.
async fn doh_refresh_task(engine: Engine, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                engine.execute_logged(Command::RefreshDoh { recheck: true }).await;
            }
        }
    }
}

async fn bus_task(
    engine: Engine,
    mut rx: broadcast::Receiver<Arc<BusMessage>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Ok(msg) => engine.handle_message(&msg).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "bus listener lagged; periodic resync will catch up");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("bus closed");
                    break;
                }
            },
        }
    }
}
