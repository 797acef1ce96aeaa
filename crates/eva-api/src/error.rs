use thiserror::Error;

/// JSON-RPC style code reported for transport failures and non-success
/// HTTP statuses.
pub const CODE_SERVER_ERROR: i64 = -32007;

/// JSON-RPC style code reported for malformed or unrecognized replies.
pub const CODE_INVALID_RESPONSE: i64 = -32009;

/// Top-level error type for the `eva-api` crate.
///
/// Covers every failure mode of the two transports: the JSON-RPC request
/// gateway and the WebSocket push channel. `eva-core` maps these into
/// user-facing errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The server answered with a non-success HTTP status.
    #[error("Server error (HTTP {status})")]
    Server { status: u16 },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Protocol ────────────────────────────────────────────────────
    /// The reply could not be parsed or does not match the request.
    #[error("Invalid server response: {message}")]
    InvalidResponse { message: String, body: String },

    // ── Remote ──────────────────────────────────────────────────────
    /// Error reported by the server inside the JSON-RPC envelope.
    #[error("Remote error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    // ── Push channel ────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the peer.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The push channel task is gone; nothing can be sent any more.
    #[error("Push channel is closed")]
    ChannelClosed,
}

impl Error {
    /// Numeric code in the JSON-RPC style used by the server.
    pub fn code(&self) -> i64 {
        match self {
            Self::Rpc { code, .. } => *code,
            Self::InvalidResponse { .. } => CODE_INVALID_RESPONSE,
            _ => CODE_SERVER_ERROR,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } => true,
            Self::Server { status } => *status >= 500,
            _ => false,
        }
    }

    /// Payload attached to a remote error, if any.
    pub fn data(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Rpc { data, .. } => data.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_server_convention() {
        assert_eq!(Error::Server { status: 502 }.code(), CODE_SERVER_ERROR);
        assert_eq!(Error::ChannelClosed.code(), CODE_SERVER_ERROR);
        let invalid = Error::InvalidResponse {
            message: "id mismatch".into(),
            body: String::new(),
        };
        assert_eq!(invalid.code(), CODE_INVALID_RESPONSE);
        let remote = Error::Rpc {
            code: -32022,
            message: "|OTP|totp|REQ".into(),
            data: None,
        };
        assert_eq!(remote.code(), -32022);
    }

    #[test]
    fn server_side_failures_are_transient() {
        assert!(Error::Server { status: 503 }.is_transient());
        assert!(!Error::Server { status: 403 }.is_transient());
        assert!(Error::WebSocketConnect("refused".into()).is_transient());
    }
}
