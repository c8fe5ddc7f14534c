// ── Core error types ──
//
// Errors surfaced by the engine. Consumers never see raw HTTP statuses;
// the `From<apguard_api::Error>` impl folds transport failures into
// controller-level variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Upstream ─────────────────────────────────────────────────────
    #[error("Access-point controller unavailable: {message}")]
    Controller {
        message: String,
        /// HTTP status code, when the controller answered at all.
        status: Option<u16>,
    },

    #[error("Directory operation failed: {message}")]
    Directory { message: String },

    #[error("DoH backend error: {message}")]
    Backend { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Malformed {what}: {message}")]
    Malformed { what: String, message: String },

    #[error("Entity not found: {entity_type} with id {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    // ── Local I/O ────────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Engine is not running")]
    EngineStopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn malformed(what: &str, err: impl std::fmt::Display) -> Self {
        Self::Malformed {
            what: what.to_owned(),
            message: err.to_string(),
        }
    }

    pub(crate) fn directory(err: impl std::fmt::Display) -> Self {
        Self::Directory {
            message: err.to_string(),
        }
    }

    pub(crate) fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<apguard_api::Error> for CoreError {
    fn from(err: apguard_api::Error) -> Self {
        match err {
            apguard_api::Error::Http { status, message } => CoreError::Controller {
                message,
                status: Some(status),
            },
            apguard_api::Error::Unauthorized => CoreError::Controller {
                message: "access token rejected".into(),
                status: Some(401),
            },
            apguard_api::Error::Deserialization { message, .. } => CoreError::Malformed {
                what: "controller response".into(),
                message,
            },
            apguard_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid controller URL: {e}"),
            },
            apguard_api::Error::Tls(message) => CoreError::Config { message },
            other => CoreError::Controller {
                message: other.to_string(),
                status: None,
            },
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::malformed("JSON payload", err)
    }
}
