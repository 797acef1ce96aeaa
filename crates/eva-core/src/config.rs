// ── Runtime client configuration ──
//
// These types describe *how* to talk to an EVA ICS HMI server. They carry
// credentials and timing, but never touch disk: the CLI (or any other
// front end) builds a `ClientConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use serde_json::Value;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use url::Url;

/// How to authenticate with the server.
#[derive(Debug, Clone, Default)]
pub enum Credentials {
    /// Log in without credentials (server must allow anonymous access).
    #[default]
    Anonymous,
    /// Static API key.
    ApiKey(SecretString),
    /// User login and password. `token` re-uses an existing session token
    /// when the server asks for the password again (e.g. read-only tokens).
    Password {
        login: String,
        password: SecretString,
        token: Option<SecretString>,
    },
    /// An existing session token.
    Token(SecretString),
}

/// Which item states the client keeps in sync.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StateUpdates {
    /// Every item the session may see.
    #[default]
    All,
    /// Items matching any of the given OID masks.
    Masks(Vec<String>),
    /// No state synchronization at all.
    Disabled,
}

impl StateUpdates {
    /// The mask list sent to the server, `None` when updates are disabled.
    pub fn masks(&self) -> Option<Vec<String>> {
        match self {
            Self::All => Some(vec!["#".to_owned()]),
            Self::Masks(masks) => Some(masks.clone()),
            Self::Disabled => None,
        }
    }

    /// The `i` parameter of a full `item.state` load.
    pub(crate) fn state_query(&self) -> Option<Value> {
        match self {
            Self::All => Some(Value::from("#")),
            Self::Masks(masks) => Some(Value::from(masks.clone())),
            Self::Disabled => None,
        }
    }
}

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed certs).
    DangerAcceptInvalid,
}

// ── Intervals ────────────────────────────────────────────────────────

/// Named timer intervals, addressable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum IntervalId {
    /// Full state poll period when the push channel is not used.
    #[strum(to_string = "ajax_reload", serialize = "poll_reload")]
    PollReload,
    /// Log backlog reload period when the push channel is not used.
    LogReload,
    /// Action result poll period.
    ActionWatch,
    /// Liveness probe period.
    Heartbeat,
    /// Safety-net full reload period in push mode (zero disables it).
    Reload,
    /// Delay before a scheduled restart.
    Restart,
    /// Server-side frame buffering for the push channel (zero disables it).
    #[strum(to_string = "ws_buf_ttl", serialize = "push_buf_ttl")]
    PushBufTtl,
}

/// Timer intervals used by the connection supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub poll_reload: Duration,
    pub log_reload: Duration,
    pub action_watch: Duration,
    pub heartbeat: Duration,
    pub reload: Duration,
    pub restart: Duration,
    pub push_buf_ttl: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            poll_reload: Duration::from_secs(2),
            log_reload: Duration::from_secs(2),
            action_watch: Duration::from_millis(500),
            heartbeat: Duration::from_secs(5),
            reload: Duration::from_secs(5),
            restart: Duration::from_secs(1),
            push_buf_ttl: Duration::ZERO,
        }
    }
}

impl Intervals {
    pub fn get(&self, id: IntervalId) -> Duration {
        match id {
            IntervalId::PollReload => self.poll_reload,
            IntervalId::LogReload => self.log_reload,
            IntervalId::ActionWatch => self.action_watch,
            IntervalId::Heartbeat => self.heartbeat,
            IntervalId::Reload => self.reload,
            IntervalId::Restart => self.restart,
            IntervalId::PushBufTtl => self.push_buf_ttl,
        }
    }

    pub fn set(&mut self, id: IntervalId, value: Duration) {
        let slot = match id {
            IntervalId::PollReload => &mut self.poll_reload,
            IntervalId::LogReload => &mut self.log_reload,
            IntervalId::ActionWatch => &mut self.action_watch,
            IntervalId::Heartbeat => &mut self.heartbeat,
            IntervalId::Reload => &mut self.reload,
            IntervalId::Restart => &mut self.restart,
            IntervalId::PushBufTtl => &mut self.push_buf_ttl,
        };
        *slot = value;
    }
}

// ── Log settings ─────────────────────────────────────────────────────

/// Log levels as numbered by the server.
pub const LOG_LEVELS: [(u32, &str); 5] = [
    (10, "DEBUG"),
    (20, "INFO"),
    (30, "WARNING"),
    (40, "ERROR"),
    (50, "CRITICAL"),
];

/// Name of a numeric log level, if it is one of the standard ones.
pub fn log_level_name(level: u32) -> Option<&'static str> {
    LOG_LEVELS
        .iter()
        .find(|(l, _)| *l == level)
        .map(|(_, name)| *name)
}

/// Numeric log level for a (case-insensitive) level name.
pub fn log_level_from_name(name: &str) -> Option<u32> {
    LOG_LEVELS
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(l, _)| *l)
}

/// Log pipeline settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    /// Minimal level of records to fetch.
    pub level: u32,
    /// Backlog size requested on load.
    pub records: u32,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: 20,
            records: 200,
        }
    }
}

// ── ClientConfig ─────────────────────────────────────────────────────

/// Configuration for one client session.
///
/// Built by the CLI, passed to [`Client`](crate::Client) -- core never
/// reads config files.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HMI server base URI (e.g. `https://hmi.local`).
    pub api_uri: Url,
    /// Authentication method and credentials.
    pub credentials: Credentials,
    /// Extra login options (e.g. an OTP code), passed as `xopts`.
    pub login_xopts: Option<Value>,
    /// Use the WebSocket push channel. Polling otherwise.
    pub push_mode: bool,
    /// Which item states to keep in sync.
    pub state_updates: StateUpdates,
    /// Clear stored items that vanish from a full state load.
    pub clear_unavailable: bool,
    /// Client id announced on the push channel.
    pub client_id: Option<String>,
    /// Timer intervals.
    pub intervals: Intervals,
    /// Log pipeline settings.
    pub log: LogSettings,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Request timeout.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Configuration with defaults for the server at `api_uri`.
    pub fn new(api_uri: Url) -> Self {
        Self {
            api_uri,
            credentials: Credentials::Anonymous,
            login_xopts: None,
            push_mode: true,
            state_updates: StateUpdates::All,
            clear_unavailable: false,
            client_id: None,
            intervals: Intervals::default(),
            log: LogSettings::default(),
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Push channel URL: the API URI with a `ws(s)` scheme, `/ws` path and
    /// session token, optional buffering TTL and client id.
    pub fn push_url(&self, token: &str) -> Result<Url, crate::CoreError> {
        let base = self.api_uri.as_str().trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_owned()
        };
        let mut url = Url::parse(&format!("{base}/ws")).map_err(|e| crate::CoreError::Config {
            message: format!("invalid push channel URL: {e}"),
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("k", token);
            let ttl = self.intervals.push_buf_ttl;
            if !ttl.is_zero() {
                query.append_pair("buf_ttl", &ttl.as_secs_f64().to_string());
            }
            if let Some(ref client_id) = self.client_id {
                query.append_pair("client_id", client_id);
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(uri: &str) -> ClientConfig {
        ClientConfig::new(Url::parse(uri).unwrap())
    }

    #[test]
    fn push_url_swaps_scheme() {
        let cfg = config("https://hmi.local/");
        assert_eq!(cfg.push_url("t1").unwrap().as_str(), "wss://hmi.local/ws?k=t1");
        let cfg = config("http://10.0.0.5:7727");
        assert_eq!(cfg.push_url("t1").unwrap().as_str(), "ws://10.0.0.5:7727/ws?k=t1");
    }

    #[test]
    fn push_url_carries_ttl_and_client_id() {
        let mut cfg = config("http://hmi.local");
        cfg.intervals.push_buf_ttl = Duration::from_millis(500);
        cfg.client_id = Some("panel1".into());
        assert_eq!(
            cfg.push_url("t1").unwrap().as_str(),
            "ws://hmi.local/ws?k=t1&buf_ttl=0.5&client_id=panel1"
        );
    }

    #[test]
    fn interval_ids_parse_both_spellings() {
        assert_eq!("ajax_reload".parse::<IntervalId>().unwrap(), IntervalId::PollReload);
        assert_eq!("poll_reload".parse::<IntervalId>().unwrap(), IntervalId::PollReload);
        assert_eq!("ws_buf_ttl".parse::<IntervalId>().unwrap(), IntervalId::PushBufTtl);
        assert_eq!("action_watch".parse::<IntervalId>().unwrap(), IntervalId::ActionWatch);
    }

    #[test]
    fn intervals_round_trip_through_ids() {
        let mut intervals = Intervals::default();
        assert_eq!(intervals.get(IntervalId::Heartbeat), Duration::from_secs(5));
        intervals.set(IntervalId::Heartbeat, Duration::from_secs(9));
        assert_eq!(intervals.heartbeat, Duration::from_secs(9));
    }

    #[test]
    fn log_level_names() {
        assert_eq!(log_level_name(30), Some("WARNING"));
        assert_eq!(log_level_name(25), None);
        assert_eq!(log_level_from_name("error"), Some(40));
    }

    #[test]
    fn state_query_shapes() {
        assert_eq!(StateUpdates::All.state_query(), Some(Value::from("#")));
        assert_eq!(StateUpdates::Disabled.masks(), None);
        let masks = StateUpdates::Masks(vec!["sensor:#".into()]);
        assert_eq!(masks.masks(), Some(vec!["sensor:#".to_owned()]));
    }
}
