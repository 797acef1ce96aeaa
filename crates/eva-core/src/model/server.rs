use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Server information returned by the `test` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub system_name: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub build: Option<u64>,
    /// Server clock, seconds since the epoch.
    pub time: f64,
    #[serde(default)]
    pub uptime: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
