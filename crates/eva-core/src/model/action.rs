use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Result of a server-side action, as returned by `action.result`.
///
/// Only `status` and `finished` are required; everything else depends on
/// the action kind and server version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub oid: Option<String>,
    /// Action status (`created`, `accepted`, `pending`, `running`,
    /// `completed`, `failed`, `canceled`, `terminated`).
    pub status: String,
    /// Terminal state reached.
    pub finished: bool,
    #[serde(default)]
    pub exitcode: Option<i64>,
    #[serde(default)]
    pub elapsed: Option<f64>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub svc: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub out: Option<Value>,
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActionResult {
    /// Finished with the `completed` status.
    pub fn is_success(&self) -> bool {
        self.finished && self.status == "completed"
    }
}
