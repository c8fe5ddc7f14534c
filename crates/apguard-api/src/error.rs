use thiserror::Error;

/// Top-level error type for the `apguard-api` crate.
///
/// Covers every failure mode of the controller REST surface and the
/// pub/sub bus. `apguard-core` maps these into engine-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Controller ──────────────────────────────────────────────────
    /// The controller rejected the bearer token.
    #[error("Controller rejected the access token")]
    Unauthorized,

    /// Non-success HTTP status from the controller.
    #[error("Controller error (HTTP {status}): {message}")]
    Http { status: u16, message: String },

    // ── Bus ─────────────────────────────────────────────────────────
    /// Pub/sub bus connection failed.
    #[error("Bus connection failed: {0}")]
    BusConnect(String),

    /// Pub/sub bus closed unexpectedly.
    #[error("Bus closed (code {code}): {reason}")]
    BusClosed { code: u16, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::BusConnect(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Http { status: 404, .. } => true,
            _ => false,
        }
    }
}
