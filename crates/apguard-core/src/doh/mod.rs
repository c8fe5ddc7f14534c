// ── DNS-over-HTTPS enforcement ──

pub mod backend;
pub mod directive;
pub mod enforcer;
pub mod restart;

pub use backend::{
    DohBackend, DohServer, ProcessBackend, ProcessBackendConfig, RestartScheduler, ServerSelection,
};
pub use directive::{DirectiveLayout, Polarity};
pub use enforcer::{ApplyReport, DohCollaborators, DohEnforcer, DohStatus, ScopeEntry, Transition};
pub use restart::DebouncedRestart;
