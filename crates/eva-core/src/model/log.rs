use serde::{Deserialize, Serialize};

use crate::config::log_level_name;

/// One server log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Formatted date/time.
    #[serde(default)]
    pub dt: Option<String>,
    #[serde(rename = "h", default)]
    pub host: Option<String>,
    #[serde(rename = "l")]
    pub level: u32,
    #[serde(rename = "lvl", default)]
    pub level_name: Option<String>,
    #[serde(rename = "mod", default)]
    pub module: Option<String>,
    #[serde(rename = "msg", default)]
    pub message: String,
    /// Timestamp (seconds).
    #[serde(rename = "t", default)]
    pub time: f64,
    #[serde(rename = "th", default)]
    pub thread: Option<String>,
}

impl LogRecord {
    /// Level name, from the record or derived from the numeric level.
    pub fn level_label(&self) -> &str {
        self.level_name
            .as_deref()
            .or_else(|| log_level_name(self.level))
            .unwrap_or("?")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn short_keys_are_renamed() {
        let r: LogRecord = serde_json::from_value(json!({
            "dt": "2024-03-01T10:00:00+00:00",
            "h": "mws1",
            "l": 30,
            "lvl": "warning",
            "mod": "eva.core",
            "msg": "disk is almost full",
            "t": 1709287200.0,
            "th": null
        }))
        .unwrap();
        assert_eq!(r.host.as_deref(), Some("mws1"));
        assert_eq!(r.module.as_deref(), Some("eva.core"));
        assert_eq!(r.level_label(), "warning");
        assert!(r.thread.is_none());
    }

    #[test]
    fn label_falls_back_to_numeric_level() {
        let r: LogRecord = serde_json::from_value(json!({"l": 40, "msg": "x"})).unwrap();
        assert_eq!(r.level_label(), "ERROR");
    }
}
