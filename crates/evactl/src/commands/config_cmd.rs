//! Config subcommand handlers.

use dialoguer::{Input, Select};

use eva_core::config::log_level_from_name;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn profile_not_found(name: String, cfg: &Config) -> CliError {
    CliError::ProfileNotFound {
        name,
        available: config::available_profiles(cfg),
    }
}

/// Keyring entry kind and prompt label for a profile's auth mode.
fn secret_kind(auth_mode: &str) -> Option<(&'static str, &'static str)> {
    match auth_mode {
        "key" => Some(("api-key", "API key: ")),
        "password" => Some(("password", "Password: ")),
        "token" => Some(("token", "Token: ")),
        _ => None,
    }
}

/// Ask where to keep a secret. Returns `None` once it is stored in the
/// keyring, or the plaintext to put in the config file.
fn store_or_keep(profile_name: &str, kind: &str, secret: String) -> Result<Option<String>, CliError> {
    let choices = &["Store in system keyring (recommended)", "Save to config file (plaintext)"];
    let selection = Select::new()
        .with_prompt(format!("Where to store the {kind}?"))
        .items(choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;
    if selection != 0 {
        return Ok(Some(secret));
    }
    config::store_secret(profile_name, kind, &secret)?;
    eprintln!("   ✓ {kind} stored in system keyring");
    Ok(None)
}

fn prompt_secret(label: &str) -> Result<String, CliError> {
    let secret = rpassword::prompt_password(label).map_err(prompt_err)?;
    if secret.is_empty() {
        return Err(CliError::Validation {
            field: "secret".into(),
            reason: "value cannot be empty".into(),
        });
    }
    Ok(secret)
}

fn parse_flag<T: std::str::FromStr>(field: &str, value: &str, expected: &str) -> Result<T, CliError> {
    value.parse().map_err(|_| CliError::Validation {
        field: field.into(),
        reason: format!("must be {expected}"),
    })
}

/// Apply `key = value` to a profile.
fn set_key(profile: &mut Profile, key: &str, value: String) -> Result<(), CliError> {
    match key {
        "server" => profile.server = value,
        "auth_mode" | "auth-mode" => {
            if secret_kind(&value).is_none() && value != "anonymous" {
                return Err(CliError::Validation {
                    field: "auth_mode".into(),
                    reason: "must be 'key', 'password', 'token' or 'anonymous'".into(),
                });
            }
            profile.auth_mode = value;
        }
        "api_key" | "api-key" => profile.api_key = Some(value),
        "api_key_env" | "api-key-env" => profile.api_key_env = Some(value),
        "login" | "user" => profile.login = Some(value),
        "client_id" | "client-id" => profile.client_id = Some(value),
        "insecure" => profile.insecure = Some(parse_flag("insecure", &value, "'true' or 'false'")?),
        "push" => profile.push = Some(parse_flag("push", &value, "'true' or 'false'")?),
        "timeout" => profile.timeout = Some(parse_flag("timeout", &value, "a number (seconds)")?),
        "ca_cert" | "ca-cert" => profile.ca_cert = Some(value.into()),
        "masks" => {
            profile.masks = Some(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_owned)
                    .collect(),
            );
        }
        "log_level" | "log-level" => {
            let level = value
                .parse()
                .ok()
                .or_else(|| log_level_from_name(&value))
                .ok_or_else(|| CliError::Validation {
                    field: "log_level".into(),
                    reason: format!("unknown log level: {value}"),
                })?;
            profile.log_level = Some(level);
        }
        other => {
            return Err(CliError::Validation {
                field: other.into(),
                reason: format!(
                    "unknown config key '{other}'. Valid keys: server, auth_mode, api_key, \
                     api_key_env, login, client_id, insecure, push, timeout, ca_cert, masks, log_level"
                ),
            });
        }
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(),

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = config::load_config_or_default();
            let out = output::render_single(
                &global.output,
                &cfg,
                |c| format!("{c:#?}"),
                |_| "config".into(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Set <key> <value> ───────────────────────────────────────
        ConfigCommand::Set { key, value } => {
            let mut cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            let profile = cfg.profiles.entry(profile_name.clone()).or_default();
            if profile.auth_mode.is_empty() {
                profile.auth_mode = "key".into();
            }
            set_key(profile, &key, value)?;
            config::save_config(&cfg)?;
            eprintln!("✓ Set {key} on profile '{profile_name}'");
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: evactl config init");
            } else {
                let mut names: Vec<_> = cfg.profiles.keys().collect();
                names.sort();
                for name in names {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        // ── Use <name> ─────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            if !cfg.profiles.contains_key(&name) {
                return Err(profile_not_found(name, &cfg));
            }
            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        // ── SetSecret ───────────────────────────────────────────────
        ConfigCommand::SetSecret { profile } => {
            let cfg = config::load_config_or_default();
            let profile_name = profile.unwrap_or_else(|| config::active_profile_name(global, &cfg));
            let Some(prof) = cfg.profiles.get(&profile_name) else {
                return Err(profile_not_found(profile_name, &cfg));
            };
            let Some((kind, label)) = secret_kind(&prof.auth_mode) else {
                return Err(CliError::Validation {
                    field: "auth_mode".into(),
                    reason: format!("profile '{profile_name}' does not use a secret"),
                });
            };
            let secret = prompt_secret(label)?;
            config::store_secret(&profile_name, kind, &secret)?;
            eprintln!("✓ Secret stored in system keyring for profile '{profile_name}'");
            Ok(())
        }
    }
}

// ── Init: interactive wizard ────────────────────────────────────────

fn init() -> Result<(), CliError> {
    let config_path = config::config_path();
    eprintln!("EVA ICS HMI client, configuration wizard");
    eprintln!("   Config path: {}\n", config_path.display());

    let profile_name: String = Input::new()
        .with_prompt("Profile name")
        .default("default".into())
        .interact_text()
        .map_err(prompt_err)?;

    let server: String = Input::new()
        .with_prompt("Server URL")
        .default("http://localhost:7727".into())
        .interact_text()
        .map_err(prompt_err)?;

    let auth_choices = &["API key", "Login and password", "Session token", "Anonymous"];
    let auth_selection = Select::new()
        .with_prompt("Authentication method")
        .items(auth_choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    let mut profile = Profile {
        server,
        ..Profile::default()
    };
    match auth_selection {
        0 => {
            profile.auth_mode = "key".into();
            let key = prompt_secret("API key: ")?;
            profile.api_key = store_or_keep(&profile_name, "api-key", key)?;
        }
        1 => {
            profile.auth_mode = "password".into();
            let login: String = Input::new()
                .with_prompt("Login")
                .interact_text()
                .map_err(prompt_err)?;
            let password = prompt_secret("Password: ")?;
            profile.login = Some(login);
            profile.password = store_or_keep(&profile_name, "password", password)?;
        }
        2 => {
            profile.auth_mode = "token".into();
            let token = prompt_secret("Token: ")?;
            profile.token = store_or_keep(&profile_name, "token", token)?;
        }
        _ => profile.auth_mode = "anonymous".into(),
    }

    let mut cfg = config::load_config_or_default();
    if cfg.profiles.is_empty() {
        cfg.default_profile = Some(profile_name.clone());
    }
    cfg.profiles.insert(profile_name.clone(), profile);
    config::save_config(&cfg)?;

    eprintln!("\n✓ Configuration written to {}", config_path.display());
    eprintln!("  Profile: {profile_name}");
    eprintln!("\n  Test it: evactl info");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn set_key_updates_profile_fields() {
        let mut profile = Profile::default();
        set_key(&mut profile, "server", "http://hmi.local".into()).unwrap();
        set_key(&mut profile, "masks", "sensor:*, unit:*,".into()).unwrap();
        set_key(&mut profile, "log-level", "warning".into()).unwrap();
        set_key(&mut profile, "push", "false".into()).unwrap();
        assert_eq!(profile.server, "http://hmi.local");
        assert_eq!(
            profile.masks,
            Some(vec!["sensor:*".to_owned(), "unit:*".to_owned()])
        );
        assert_eq!(profile.log_level, Some(30));
        assert_eq!(profile.push, Some(false));
    }

    #[test]
    fn set_key_rejects_bad_values() {
        let mut profile = Profile::default();
        assert!(set_key(&mut profile, "auth_mode", "oauth".into()).is_err());
        assert!(set_key(&mut profile, "timeout", "soon".into()).is_err());
        assert!(set_key(&mut profile, "site", "x".into()).is_err());
        set_key(&mut profile, "auth_mode", "anonymous".into()).unwrap();
        assert_eq!(profile.auth_mode, "anonymous");
    }
}
