// apguard-api: Async client for the access-point controller (REST + pub/sub bus)

pub mod bus;
pub mod client;
pub mod error;
pub mod models;
pub mod transport;

pub use bus::{BusHandle, BusMessage, ReconnectConfig};
pub use client::ApcClient;
pub use error::Error;
pub use models::{
    ApcConfig, ConntrackRecord, IdValue, Ports, SsidProfileConfig, StationAssignment,
    StationInfo, StationTable, StationUpdate,
};
pub use transport::{TlsMode, TransportConfig};
