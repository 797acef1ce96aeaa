//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use eva_config::ConfigError;
use eva_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const REMOTE: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to server at {url}")]
    #[diagnostic(
        code(evactl::connection_failed),
        help(
            "Check that the HMI server is running and accessible.\n\
             URL: {url}\n\
             Self-signed certificate? Try: evactl info --insecure"
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Connection to the server was lost")]
    #[diagnostic(code(evactl::disconnected))]
    Disconnected,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed ({code}): {message}")]
    #[diagnostic(
        code(evactl::auth_failed),
        help(
            "Verify your API key or login credentials.\n\
             Run: evactl config set-secret"
        )
    )]
    AuthFailed { code: i64, message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(evactl::no_credentials),
        help(
            "Configure credentials with: evactl config init\n\
             Or set the EVA_API_KEY environment variable."
        )
    )]
    NoCredentials { profile: String },

    // ── Remote ───────────────────────────────────────────────────────
    #[error("Server error ({code}): {message}")]
    #[diagnostic(code(evactl::remote_error))]
    Remote { code: i64, message: String },

    #[error("Unexpected server reply: {message}")]
    #[diagnostic(code(evactl::protocol))]
    Protocol { message: String },

    #[error("No item matches '{pattern}'")]
    #[diagnostic(
        code(evactl::not_found),
        help("Run: evactl state to see available items")
    )]
    NotFound { pattern: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(evactl::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(evactl::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: evactl config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(evactl::no_config),
        help(
            "Create one with: evactl config init\n\
             Or pass the server with --server.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(evactl::config))]
    Config(ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s")]
    #[diagnostic(
        code(evactl::timeout),
        help("Increase the limit or check server responsiveness.")
    )]
    Timeout { seconds: u64 },

    #[error("Action {uuid} finished with status {status}")]
    #[diagnostic(code(evactl::action_failed))]
    ActionFailed { uuid: uuid::Uuid, status: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(evactl::json), help("Check the JSON parameters and try again."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Disconnected => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Remote { .. } | Self::Protocol { .. } => exit_code::REMOTE,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed {
                url,
                source: reason.into(),
            },
            CoreError::AuthenticationFailed { code, message } => {
                CliError::AuthFailed { code, message }
            }
            CoreError::NotLoggedIn => CliError::Disconnected,
            CoreError::Timeout => CliError::Timeout { seconds: 0 },
            CoreError::Remote { code, message, .. } => CliError::Remote { code, message },
            CoreError::Protocol { message } | CoreError::Internal(message) => {
                CliError::Protocol { message }
            }
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}
