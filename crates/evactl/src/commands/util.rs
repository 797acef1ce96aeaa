//! Shared helpers for command handlers.

use std::path::Path;
use std::sync::Arc;

use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use eva_core::{Client, ClientConfig, Credentials, ItemState, StateUpdates};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

/// Log in with a one-shot configuration: no push channel, and only the
/// state sync the command needs.
pub async fn connect_once(mut config: ClientConfig, states: bool) -> Result<Client, CliError> {
    config.push_mode = false;
    if !states {
        config.state_updates = StateUpdates::Disabled;
    }
    connect(config).await
}

/// Log in and start synchronizing.
pub async fn connect(config: ClientConfig) -> Result<Client, CliError> {
    let url = config.api_uri.to_string();
    tracing::debug!(%url, push = config.push_mode, "connecting");
    let client = Client::new(config)?;
    client.start().await?;
    Ok(client)
}

/// End the session. Sessions opened from an existing token are left
/// alive on the server.
pub async fn disconnect(client: &Client) {
    let keep_auth = matches!(client.config().credentials, Credentials::Token(_));
    if let Err(e) = client.stop(keep_auth).await {
        tracing::debug!(error = %e, "logout failed");
    }
}

/// Parse call parameters: inline JSON or `@path` to a JSON file.
pub fn parse_params(raw: Option<&str>) -> Result<Value, CliError> {
    match raw {
        None => Ok(Value::Object(serde_json::Map::new())),
        Some(raw) => match raw.strip_prefix('@') {
            Some(path) => read_json_file(Path::new(path)),
            None => Ok(serde_json::from_str(raw)?),
        },
    }
}

/// Read and parse a JSON file.
pub fn read_json_file(path: &Path) -> Result<Value, CliError> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| CliError::Validation {
        field: "params".into(),
        reason: format!("invalid JSON in {}: {e}", path.display()),
    })
}

/// Format a server timestamp (seconds) as UTC.
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
pub fn format_time(t: Option<f64>) -> String {
    t.and_then(|t| DateTime::from_timestamp_millis((t * 1000.0).round() as i64))
        .map_or_else(|| "-".into(), |dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
}

// ── Item state rendering ────────────────────────────────────────────

#[derive(Tabled)]
pub struct StateRow {
    #[tabled(rename = "OID")]
    pub oid: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Updated")]
    pub updated: String,
}

/// Serializable view of a state, with the coerced value.
#[derive(Serialize)]
pub struct StateView<'a> {
    pub oid: &'a str,
    pub status: Option<i64>,
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<&'a str>,
}

impl<'a> From<&'a Arc<ItemState>> for StateView<'a> {
    fn from(state: &'a Arc<ItemState>) -> Self {
        Self {
            oid: &state.oid,
            status: state.status(),
            value: state.value(),
            t: state.t,
            node: state.node.as_deref(),
        }
    }
}

pub fn display_value(value: Option<&Value>) -> String {
    match value {
        None => "-".into(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn state_row(view: &StateView<'_>, color: bool) -> StateRow {
    StateRow {
        oid: view.oid.to_owned(),
        status: output::paint_status(view.status, color),
        value: display_value(view.value.as_ref()),
        updated: format_time(view.t),
    }
}

pub fn state_line(view: &StateView<'_>, color: bool) -> String {
    format!(
        "{} {} {}",
        output::paint_oid(view.oid, color),
        output::paint_status(view.status, color),
        display_value(view.value.as_ref())
    )
}

pub fn color_enabled(global: &GlobalOpts) -> bool {
    output::should_color(&global.color)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn params_default_to_empty_object() {
        assert_eq!(parse_params(None).unwrap(), json!({}));
        assert_eq!(parse_params(Some(r#"{"i":"unit:a"}"#)).unwrap(), json!({"i": "unit:a"}));
        assert!(matches!(parse_params(Some("{oops")), Err(CliError::Json(_))));
    }

    #[test]
    fn times_render_in_utc() {
        assert_eq!(format_time(Some(0.25)), "1970-01-01 00:00:00.250");
        assert_eq!(format_time(None), "-");
    }

    #[test]
    fn lines_show_coerced_values() {
        let state: ItemState =
            serde_json::from_value(json!({"oid": "sensor:t1", "status": 1, "value": "21.5"})).unwrap();
        let state = Arc::new(state);
        let view = StateView::from(&state);
        assert_eq!(state_line(&view, false), "sensor:t1 1 21.5");
        assert_eq!(display_value(Some(&json!("on"))), "on");
    }
}
