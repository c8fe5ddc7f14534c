// ── SSID identity-to-group resolution ──

pub mod cache;
pub mod resolver;

pub use cache::ProfileCache;
pub use resolver::{SsidResolver, StationJoin};
