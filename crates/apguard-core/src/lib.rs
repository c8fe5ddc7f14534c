//! Policy-enforcement engine between the access-point controller, the
//! host/tag directories, and the DNS backend.
//!
//! - **[`Engine`]**: Central facade. [`start()`](Engine::start) loads the
//!   SSID profile cache, reconciles it with the controller, runs a full
//!   station resync and a DoH convergence pass, then spawns the command
//!   processor, the interval timers, and the bus listener.
//!
//! - **[`SsidResolver`]**: Keeps each station's SSID tag and device group
//!   in line with the controller despite out-of-order, duplicate, or
//!   dropped notifications. All work runs inside one critical section.
//!
//! - **[`DohEnforcer`]**: Resolves the global/tag/network/device/identity
//!   scope hierarchy into dnsmasq directive files, idempotently, with
//!   two-phase garbage collection of settings whose entity disappeared.
//!
//! - **[`RuleForwarder`]** and **[`ConntrackTranslator`]**: Mirror
//!   controller-enforceable policy rules upstream, and turn conntrack
//!   batches into connection-log records.
//!
//! - **Collaborators** ([`directory`], [`apc`], [`doh::DohBackend`]):
//!   Trait seams for everything external; [`MemoryDirectory`] is the
//!   inventory-file-backed implementation.

pub mod apc;
pub mod channels;
pub mod command;
pub mod config;
pub mod conntrack;
pub mod directory;
pub mod doh;
pub mod engine;
pub mod error;
pub mod model;
pub mod rules;
pub mod ssid;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use apc::AccessPointController;
pub use command::{Command, CommandResult};
pub use config::EngineConfig;
pub use conntrack::{ConnLogSink, ConntrackTranslator, JsonLinesSink};
pub use directory::{Inventory, MemoryDirectory};
pub use doh::{
    DebouncedRestart, DohEnforcer, DohServer, DohStatus, ProcessBackend, ProcessBackendConfig,
    ServerSelection, Transition,
};
pub use engine::{Collaborators, Engine, EngineState};
pub use error::CoreError;
pub use rules::{RuleForwarder, is_forwardable};
pub use ssid::{SsidResolver, StationJoin};
pub use store::ScopeSettings;

pub use model::{
    ConnLog, EnforcementAction, EnforcementEvent, FeaturePolicy, Host, Identity, MacAddress,
    Network, PolicyRule, Scope, ScopeKind, Tag, TagKind, TagUid, TriState,
};
