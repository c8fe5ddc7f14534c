// ── Domain model ──

pub mod conn_log;
pub mod host;
pub mod ids;
pub mod rule;
pub mod scope;
pub mod tag;

pub use conn_log::ConnLog;
pub use host::{Host, Identity, Network};
pub use ids::{MacAddress, TagUid, is_mac_address, is_path_safe_id};
pub use rule::{EnforcementAction, EnforcementEvent, PolicyRule};
pub use scope::{FeaturePolicy, GLOBAL_SCOPE_ID, Scope, ScopeKind, TriState, is_valid_id};
pub use tag::{Tag, TagKind, TagSpec};
