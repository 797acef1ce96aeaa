// ── Core error types ──
//
// User-facing errors from eva-core. Transport details (reqwest errors,
// raw reply bodies) stay in eva-api; the `From<eva_api::Error>` impl
// folds them into the variants below while keeping the JSON-RPC style
// numeric code the server convention relies on.

use eva_api::error::{CODE_INVALID_RESPONSE, CODE_SERVER_ERROR};
use thiserror::Error;

/// Unified error type for the core crate.
///
/// Cloneable so one failure can be fanned out to every action watcher
/// registered for the same operation.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed ({code}): {message}")]
    AuthenticationFailed { code: i64, message: String },

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Request timed out")]
    Timeout,

    // ── Remote errors ────────────────────────────────────────────────
    /// Error reported by the server, surfaced verbatim.
    #[error("Remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The server reply could not be understood.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// JSON-RPC style numeric code.
    ///
    /// Remote and authentication errors keep the server's own code;
    /// protocol failures map to `-32009`, everything else to `-32007`.
    pub fn code(&self) -> i64 {
        match self {
            Self::Remote { code, .. } | Self::AuthenticationFailed { code, .. } => *code,
            Self::Protocol { .. } => CODE_INVALID_RESPONSE,
            _ => CODE_SERVER_ERROR,
        }
    }

    /// Wrap a login failure, keeping the original code and message.
    pub(crate) fn into_auth_failure(self) -> Self {
        match self {
            Self::AuthenticationFailed { .. } => self,
            other => Self::AuthenticationFailed {
                code: other.code(),
                message: match other {
                    Self::Remote { message, .. } => message,
                    ref e => e.to_string(),
                },
            },
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<eva_api::Error> for CoreError {
    fn from(err: eva_api::Error) -> Self {
        match err {
            eva_api::Error::Rpc {
                code,
                message,
                data,
            } => CoreError::Remote {
                code,
                message,
                data,
            },
            eva_api::Error::InvalidResponse { message, body: _ } => {
                CoreError::Protocol { message }
            }
            eva_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                }
            }
            eva_api::Error::Server { status } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("server error (HTTP {status})"),
            },
            eva_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            eva_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            eva_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            eva_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            eva_api::Error::ChannelClosed => CoreError::ConnectionFailed {
                url: String::new(),
                reason: "push channel is closed".into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_keep_their_code() {
        let err = CoreError::from(eva_api::Error::Rpc {
            code: -32002,
            message: "access denied".into(),
            data: None,
        });
        assert_eq!(err.code(), -32002);
        assert!(matches!(err, CoreError::Remote { .. }));
    }

    #[test]
    fn transport_codes_follow_server_convention() {
        let invalid = CoreError::from(eva_api::Error::InvalidResponse {
            message: "bad".into(),
            body: String::new(),
        });
        assert_eq!(invalid.code(), -32009);
        let server = CoreError::from(eva_api::Error::Server { status: 502 });
        assert_eq!(server.code(), -32007);
        assert_eq!(CoreError::NotLoggedIn.code(), -32007);
    }

    #[test]
    fn login_failures_keep_the_remote_code() {
        let err = CoreError::Remote {
            code: -32022,
            message: "|OTP|totp|REQ".into(),
            data: None,
        }
        .into_auth_failure();
        match err {
            CoreError::AuthenticationFailed { code, message } => {
                assert_eq!(code, -32022);
                assert_eq!(message, "|OTP|totp|REQ");
            }
            other => panic!("expected AuthenticationFailed, got {other:?}"),
        }
    }
}
