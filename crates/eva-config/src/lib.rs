//! Shared configuration for EVA ICS HMI tools.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `eva_core::ClientConfig`. The CLI adds flag-aware
//! wrappers on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use eva_core::{ClientConfig, Credentials, IntervalId, StateUpdates, TlsVerification};

/// Keyring service name secrets are stored under.
pub const KEYRING_SERVICE: &str = "evactl";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named server profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Use the WebSocket push channel unless a profile says otherwise.
    #[serde(default = "default_push")]
    pub push: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
            push: default_push(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_push() -> bool {
    true
}

/// A named server profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// HMI server base URL (e.g., "https://hmi.local").
    pub server: String,

    /// Auth mode: "key", "password", "token" or "anonymous".
    #[serde(default = "default_auth_mode")]
    pub auth_mode: String,

    /// API key (plaintext, prefer keyring or env var).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,

    /// User login for password auth.
    pub login: Option<String>,

    /// Password (plaintext, prefer keyring).
    pub password: Option<String>,

    /// Existing session token (plaintext, prefer keyring).
    pub token: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,

    /// Override push channel usage.
    pub push: Option<bool>,

    /// Client id announced on the push channel.
    pub client_id: Option<String>,

    /// Item masks to keep in sync. All items when unset.
    pub masks: Option<Vec<String>>,

    /// Clear stored items that vanish from a full reload.
    #[serde(default)]
    pub clear_unavailable: bool,

    /// Minimal log level fetched by `log` commands.
    pub log_level: Option<u32>,

    /// Log backlog size.
    pub log_records: Option<u32>,

    /// Timer overrides, in seconds.
    #[serde(default)]
    pub intervals: IntervalOverrides,
}

fn default_auth_mode() -> String {
    "key".into()
}

/// Per-profile timer overrides, in seconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct IntervalOverrides {
    pub poll_reload: Option<f64>,
    pub log_reload: Option<f64>,
    pub action_watch: Option<f64>,
    pub heartbeat: Option<f64>,
    pub reload: Option<f64>,
    pub restart: Option<f64>,
    pub push_buf_ttl: Option<f64>,
}

impl IntervalOverrides {
    fn entries(&self) -> [(IntervalId, Option<f64>); 7] {
        [
            (IntervalId::PollReload, self.poll_reload),
            (IntervalId::LogReload, self.log_reload),
            (IntervalId::ActionWatch, self.action_watch),
            (IntervalId::Heartbeat, self.heartbeat),
            (IntervalId::Reload, self.reload),
            (IntervalId::Restart, self.restart),
            (IntervalId::PushBufTtl, self.push_buf_ttl),
        ]
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "eva-ics", "evactl").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("evactl");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the Config from `path` + environment.
///
/// `EVA_` variables override file values; nested keys are separated by
/// a double underscore (`EVA_DEFAULTS__TIMEOUT=5`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("EVA_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution (without CLI flags) ───────────────────────

fn keyring_secret(profile_name: &str, kind: &str) -> Option<SecretString> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/{kind}"))
        .ok()
        .and_then(|entry| entry.get_password().ok())
        .map(SecretString::from)
}

/// Store a secret for `profile_name` in the system keyring.
pub fn store_secret(profile_name: &str, kind: &str, secret: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/{kind}"))
        .and_then(|entry| entry.set_password(secret))
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

/// Resolve an API key from the credential chain (no CLI flag step).
pub fn resolve_api_key(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's api_key_env → env var lookup
    if let Some(ref env_name) = profile.api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Some(secret) = keyring_secret(profile_name, "api-key") {
        return Ok(secret);
    }

    // 3. Plaintext in config
    if let Some(ref key) = profile.api_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Resolve login + password without CLI flags.
pub fn resolve_password_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<(String, SecretString), ConfigError> {
    let login = profile
        .login
        .clone()
        .or_else(|| std::env::var("EVA_LOGIN").ok())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })?;

    // 1. Env var
    if let Ok(pw) = std::env::var("EVA_PASSWORD") {
        return Ok((login, SecretString::from(pw)));
    }

    // 2. Keyring
    if let Some(pw) = keyring_secret(profile_name, "password") {
        return Ok((login, pw));
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok((login, SecretString::from(pw.clone())));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Resolve an existing session token without CLI flags.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    if let Ok(token) = std::env::var("EVA_TOKEN") {
        return Ok(SecretString::from(token));
    }
    if let Some(token) = keyring_secret(profile_name, "token") {
        return Ok(token);
    }
    profile
        .token
        .clone()
        .map(SecretString::from)
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })
}

/// Resolve `Credentials` from a profile's `auth_mode` field.
pub fn resolve_credentials(profile: &Profile, profile_name: &str) -> Result<Credentials, ConfigError> {
    match profile.auth_mode.as_str() {
        "key" => Ok(Credentials::ApiKey(resolve_api_key(profile, profile_name)?)),
        "password" => {
            let (login, password) = resolve_password_credentials(profile, profile_name)?;
            Ok(Credentials::Password {
                login,
                password,
                token: None,
            })
        }
        "token" => Ok(Credentials::Token(resolve_token(profile, profile_name)?)),
        "anonymous" => Ok(Credentials::Anonymous),
        other => Err(ConfigError::Validation {
            field: "auth_mode".into(),
            reason: format!("expected 'key', 'password', 'token' or 'anonymous', got '{other}'"),
        }),
    }
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `ClientConfig` from a profile and the global defaults, with
/// no CLI flag overrides.
pub fn profile_to_client_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    let url: url::Url = profile.server.parse().map_err(|_| ConfigError::Validation {
        field: "server".into(),
        reason: format!("invalid URL: {}", profile.server),
    })?;

    let mut config = ClientConfig::new(url);
    config.credentials = resolve_credentials(profile, profile_name)?;

    config.tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.push_mode = profile.push.unwrap_or(defaults.push);
    config.client_id.clone_from(&profile.client_id);
    config.clear_unavailable = profile.clear_unavailable;
    if let Some(ref masks) = profile.masks {
        config.state_updates = if masks.is_empty() {
            StateUpdates::Disabled
        } else {
            StateUpdates::Masks(masks.clone())
        };
    }
    if let Some(level) = profile.log_level {
        config.log.level = level;
    }
    if let Some(records) = profile.log_records {
        config.log.records = records;
    }

    for (id, secs) in profile.intervals.entries() {
        let Some(secs) = secs else { continue };
        let value = Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::Validation {
            field: format!("intervals.{id}"),
            reason: e.to_string(),
        })?;
        config.intervals.set(id, value);
    }

    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
        default_profile = "plant"

        [defaults]
        timeout = 10

        [profiles.plant]
        server = "https://hmi.plant.local"
        auth_mode = "password"
        login = "operator"
        password = "plain"
        client_id = "panel1"
        masks = ["sensor:#", "unit:#"]

        [profiles.plant.intervals]
        heartbeat = 2.5
        action_watch = 0.25

        [profiles.lab]
        server = "http://10.0.0.5:7727"
        auth_mode = "anonymous"
        push = false
    "#;

    fn profile(server: &str, auth_mode: &str) -> Profile {
        Profile {
            server: server.into(),
            auth_mode: auth_mode.into(),
            ..Profile::default()
        }
    }

    #[test]
    fn file_and_env_are_merged() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", SAMPLE)?;
            jail.set_env("EVA_DEFAULTS__OUTPUT", "json");

            let config = load_config_from(Path::new("config.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.default_profile.as_deref(), Some("plant"));
            assert_eq!(config.defaults.timeout, 10);
            assert_eq!(config.defaults.output, "json");
            assert!(config.defaults.push);
            assert_eq!(config.profiles.len(), 2);
            assert_eq!(config.profiles["lab"].push, Some(false));
            Ok(())
        });
    }

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_| {
            let config = load_config_from(Path::new("absent.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.default_profile.as_deref(), Some("default"));
            assert_eq!(config.defaults.output, "table");
            assert!(config.profiles.is_empty());
            Ok(())
        });
    }

    #[test]
    fn profile_translates_to_client_config() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", SAMPLE)?;
            jail.set_env("EVA_PASSWORD", "from-env");
            let config = load_config_from(Path::new("config.toml")).map_err(|e| e.to_string())?;

            let client = profile_to_client_config(&config.profiles["plant"], "plant", &config.defaults)
                .map_err(|e| e.to_string())?;
            assert_eq!(client.api_uri.as_str(), "https://hmi.plant.local/");
            assert_eq!(client.timeout, Duration::from_secs(10));
            assert!(client.push_mode);
            assert_eq!(client.client_id.as_deref(), Some("panel1"));
            assert_eq!(
                client.state_updates,
                StateUpdates::Masks(vec!["sensor:#".into(), "unit:#".into()])
            );
            assert_eq!(client.intervals.heartbeat, Duration::from_millis(2500));
            assert_eq!(client.intervals.action_watch, Duration::from_millis(250));
            assert_eq!(client.intervals.restart, Duration::from_secs(1));
            match client.credentials {
                Credentials::Password { login, password, .. } => {
                    assert_eq!(login, "operator");
                    assert_eq!(password.expose_secret(), "from-env");
                }
                other => panic!("unexpected credentials {other:?}"),
            }
            Ok(())
        });
    }

    #[test]
    fn api_key_env_wins() {
        Jail::expect_with(|jail| {
            jail.set_env("PLANT_KEY", "secret-key");
            let mut p = profile("https://hmi.local", "key");
            p.api_key_env = Some("PLANT_KEY".into());
            p.api_key = Some("plaintext".into());
            let key = resolve_api_key(&p, "plant").map_err(|e| e.to_string())?;
            assert_eq!(key.expose_secret(), "secret-key");
            Ok(())
        });
    }

    #[test]
    fn anonymous_and_token_modes() {
        Jail::expect_with(|jail| {
            let p = profile("http://hmi.local", "anonymous");
            let config = profile_to_client_config(&p, "lab", &Defaults::default())
                .map_err(|e| e.to_string())?;
            assert!(matches!(config.credentials, Credentials::Anonymous));

            jail.set_env("EVA_TOKEN", "tok");
            let p = profile("http://hmi.local", "token");
            match resolve_credentials(&p, "lab").map_err(|e| e.to_string())? {
                Credentials::Token(token) => assert_eq!(token.expose_secret(), "tok"),
                other => panic!("unexpected credentials {other:?}"),
            }
            Ok(())
        });
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = profile_to_client_config(
            &profile("not a url", "anonymous"),
            "bad",
            &Defaults::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "server"));

        let err = resolve_credentials(&profile("http://hmi.local", "oauth"), "bad").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "auth_mode"));

        let mut p = profile("http://hmi.local", "anonymous");
        p.intervals.heartbeat = Some(-1.0);
        let err = profile_to_client_config(&p, "bad", &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "intervals.heartbeat"));
    }

    #[test]
    fn empty_mask_list_disables_updates() {
        let mut p = profile("http://hmi.local", "anonymous");
        p.masks = Some(Vec::new());
        let config = profile_to_client_config(&p, "lab", &Defaults::default()).unwrap();
        assert_eq!(config.state_updates, StateUpdates::Disabled);
    }

    #[test]
    fn saved_config_loads_back() {
        Jail::expect_with(|jail| {
            let mut config = Config::default();
            config
                .profiles
                .insert("lab".into(), profile("http://hmi.local", "anonymous"));
            let path = jail.directory().join("nested").join("config.toml");
            save_config_to(&config, &path).map_err(|e| e.to_string())?;

            let loaded = load_config_from(&path).map_err(|e| e.to_string())?;
            assert_eq!(loaded.profiles["lab"].server, "http://hmi.local");
            assert_eq!(loaded.profiles["lab"].auth_mode, "anonymous");
            Ok(())
        });
    }
}
