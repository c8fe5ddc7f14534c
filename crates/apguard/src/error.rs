//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use apguard_config::ConfigError;
use apguard_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Upstream ─────────────────────────────────────────────────────

    #[error("Access-point controller unavailable: {message}")]
    #[diagnostic(
        code(apguard::controller),
        help(
            "Check that the controller is running and that controller.url and \
             controller.token_env are set correctly."
        )
    )]
    Controller { message: String },

    #[error("DoH backend failed: {message}")]
    #[diagnostic(
        code(apguard::backend),
        help("Check the doh.*_command settings and that the proxy service exists.")
    )]
    Backend { message: String },

    // ── Data ─────────────────────────────────────────────────────────

    #[error("{entity_type} '{identifier}' not found")]
    #[diagnostic(code(apguard::not_found))]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    #[error("Malformed {what}: {message}")]
    #[diagnostic(code(apguard::malformed), help("Check the file contents and try again."))]
    Malformed { what: String, message: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Invalid configuration: {field}: {reason}")]
    #[diagnostic(
        code(apguard::config_invalid),
        help("Run `apguard config show` to see the effective configuration.")
    )]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(apguard::config))]
    Config(Box<ConfigError>),

    // ── Runtime ──────────────────────────────────────────────────────

    #[error("Engine error: {0}")]
    #[diagnostic(code(apguard::engine))]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(apguard::json), help("Check the JSON file contents and try again."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Controller { .. } => exit_code::CONNECTION,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::Config(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Controller { message, .. } => Self::Controller { message },
            CoreError::Backend { message } => Self::Backend { message },
            CoreError::NotFound {
                entity_type,
                identifier,
            } => Self::NotFound {
                entity_type,
                identifier,
            },
            CoreError::Malformed { what, message } => Self::Malformed { what, message },
            CoreError::Config { message } => Self::Validation {
                field: "controller".into(),
                reason: message,
            },
            CoreError::Io(e) => Self::Io(e),
            other => Self::Engine(other.to_string()),
        }
    }
}

impl From<apguard_api::Error> for CliError {
    fn from(err: apguard_api::Error) -> Self {
        CoreError::from(err).into()
    }
}
