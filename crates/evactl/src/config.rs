//! CLI configuration: thin wrapper around `eva_config` shared types.
//!
//! Re-exports the shared types and adds resolution that respects
//! `GlobalOpts` flag overrides (--server, --api-key, --user, ...).

use std::time::Duration;

use secrecy::SecretString;

use eva_core::{ClientConfig, Credentials, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use eva_config::{
    Config, Profile, config_path, load_config_or_default, save_config, store_secret,
};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Comma-separated profile names, for error help text.
pub fn available_profiles(config: &Config) -> String {
    let mut names: Vec<_> = config.profiles.keys().cloned().collect();
    if names.is_empty() {
        return "(none)".into();
    }
    names.sort();
    names.join(", ")
}

/// Build a `ClientConfig` from the config file, profile, and CLI overrides.
pub fn build_client_config(global: &GlobalOpts) -> Result<ClientConfig, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    if let Some(profile) = cfg.profiles.get(&profile_name) {
        return resolve_profile(profile, &profile_name, global, &cfg);
    }
    if global.profile.is_some() {
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: available_profiles(&cfg),
        });
    }

    // No profile found -- build from CLI flags / env vars alone
    let server = global.server.as_deref().ok_or_else(|| CliError::NoConfig {
        path: config_path().display().to_string(),
    })?;
    let mut config = ClientConfig::new(parse_server(server)?);
    config.credentials = flag_credentials(global)?.unwrap_or_default();
    apply_flags(&mut config, global);
    config.timeout = Duration::from_secs(global.timeout);
    Ok(config)
}

/// Translate a `Profile` + global flags into a `ClientConfig`.
///
/// CLI flag overrides take priority over profile values.
pub fn resolve_profile(
    profile: &Profile,
    profile_name: &str,
    global: &GlobalOpts,
    cfg: &Config,
) -> Result<ClientConfig, CliError> {
    let mut config = match flag_credentials(global)? {
        Some(credentials) => {
            // Flag credentials replace the profile's secret chain.
            let mut bare = profile.clone();
            bare.auth_mode = "anonymous".into();
            let mut config =
                eva_config::profile_to_client_config(&bare, profile_name, &cfg.defaults)?;
            config.credentials = credentials;
            config
        }
        None => eva_config::profile_to_client_config(profile, profile_name, &cfg.defaults)?,
    };

    if let Some(ref server) = global.server {
        config.api_uri = parse_server(server)?;
    }
    apply_flags(&mut config, global);
    if profile.timeout.is_none() {
        config.timeout = Duration::from_secs(global.timeout);
    }
    Ok(config)
}

fn parse_server(server: &str) -> Result<url::Url, CliError> {
    server.parse().map_err(|_| CliError::Validation {
        field: "server".into(),
        reason: format!("invalid URL: {server}"),
    })
}

fn apply_flags(config: &mut ClientConfig, global: &GlobalOpts) {
    if global.insecure {
        config.tls = TlsVerification::DangerAcceptInvalid;
    }
    if global.no_push {
        config.push_mode = false;
    }
}

/// Credentials given on the command line, if any.
///
/// `--api-key` wins over `--user`. A user password comes from
/// `EVA_PASSWORD` or an interactive prompt.
fn flag_credentials(global: &GlobalOpts) -> Result<Option<Credentials>, CliError> {
    if let Some(ref key) = global.api_key {
        return Ok(Some(Credentials::ApiKey(SecretString::from(key.clone()))));
    }
    let Some(ref login) = global.user else {
        return Ok(None);
    };
    let password = match std::env::var("EVA_PASSWORD") {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password(format!("Password for {login}: ")).map_err(|e| {
            CliError::Validation {
                field: "password".into(),
                reason: format!("prompt failed: {e}"),
            }
        })?,
    };
    Ok(Some(Credentials::Password {
        login: login.clone(),
        password: SecretString::from(password),
        token: None,
    }))
}
