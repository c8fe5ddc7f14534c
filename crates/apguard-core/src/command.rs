// ── Command API ──
//
// Admin-initiated mutations flow through a unified `Command` enum. The
// engine's command processor executes them one at a time, so DoH state
// changes never interleave.

use crate::doh::{ApplyReport, DohStatus, ServerSelection, Transition};
use crate::error::CoreError;
use crate::model::{FeaturePolicy, Scope};
use crate::ssid::resolver::ProfileSync;

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// Everything an operator (or the bus) can ask the engine to do.
#[derive(Debug, Clone)]
pub enum Command {
    // ── DoH ──────────────────────────────────────────────────────────
    ApplyPolicy { scope: Scope, policy: FeaturePolicy },
    RefreshDoh { recheck: bool },
    ResetDoh,
    AdminStart,
    AdminStop,
    SetServers(ServerSelection),
    DohStatus,

    // ── SSID ─────────────────────────────────────────────────────────
    ReconcileProfiles,
    FullResync,

    // ── Rules ────────────────────────────────────────────────────────
    SyncRules,
}

/// Result of a successfully executed command.
#[derive(Debug, Clone)]
pub enum CommandResult {
    Transition(Transition),
    Applied(ApplyReport),
    ServersChanged(bool),
    Status(Box<DohStatus>),
    ProfilesSynced(ProfileSync),
    Resynced(usize),
    RulesSynced(usize),
}
