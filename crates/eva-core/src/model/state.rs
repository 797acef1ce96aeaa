// ── Item state model ──
//
// One `ItemState` per tracked OID. Fields are patch-like: `None` means the
// field was absent from the record that produced this state, which is
// different from an explicit `null` (`Some(None)` / `Some(Value::Null)`).
// The ordering token is resolved from the wire fields once, at ingestion.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

// ── OrderingToken ────────────────────────────────────────────────────

/// Ordering information carried by a state record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderingToken {
    /// Instance event id: `(generation, sequence)`. Generation `0` is a
    /// sentinel that always supersedes.
    Ieid { generation: u64, sequence: u64 },
    /// Legacy wall-clock set time (seconds).
    WallClock(f64),
}

// ── ItemState ────────────────────────────────────────────────────────

/// The state of one item, as last accepted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireState", into = "WireState")]
pub struct ItemState {
    /// Item OID (e.g. `sensor:env/temp1`).
    pub oid: String,
    /// `Some(None)` is an explicit null status (unknown / unavailable).
    pub status: Option<Option<i64>>,
    /// `Some(Value::Null)` is an explicit null value.
    pub value: Option<Value>,
    /// Reporting node. A node change resets ordering.
    pub node: Option<String>,
    /// Server timestamp of the last state change.
    pub t: Option<f64>,
    /// Free-form sidecar (e.g. lvar expiration).
    pub meta: Option<Value>,
    pub token: Option<OrderingToken>,
    /// Every other field the server sent (`act`, `connected`, ...).
    pub extra: Map<String, Value>,
}

impl ItemState {
    /// The record fed to the store when an item becomes unavailable.
    pub fn cleared(oid: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            status: Some(None),
            value: Some(Value::Null),
            node: None,
            t: None,
            meta: None,
            token: None,
            extra: Map::new(),
        }
    }

    /// Item status, `None` when unknown or null.
    pub fn status(&self) -> Option<i64> {
        self.status.flatten()
    }

    /// Whether the record carries a non-null status.
    pub fn has_status(&self) -> bool {
        self.status().is_some()
    }

    /// Raw value, `None` when absent or null.
    pub fn raw_value(&self) -> Option<&Value> {
        self.value.as_ref().filter(|v| !v.is_null())
    }

    /// Value with numeric coercion: strings that parse as numbers are
    /// returned as numbers.
    pub fn value(&self) -> Option<Value> {
        self.raw_value().map(coerce_numeric)
    }

    /// An extra field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    /// Item type, the part of the OID before `:`.
    pub fn kind(&self) -> &str {
        self.oid.split_once(':').map_or("", |(kind, _)| kind)
    }

    /// Whether this record wins over `old` for the same OID.
    ///
    /// Accepted when there is no stored record, the reporting node changed,
    /// or the ordering token is newer. A record without any token means
    /// "set now" and is accepted.
    pub fn supersedes(&self, old: Option<&ItemState>) -> bool {
        let Some(old) = old else { return true };
        if self.node != old.node {
            return true;
        }
        match (self.token, old.token) {
            (
                Some(OrderingToken::Ieid {
                    generation,
                    sequence,
                }),
                Some(OrderingToken::Ieid {
                    generation: old_generation,
                    sequence: old_sequence,
                }),
            ) => {
                generation == 0
                    || old_generation < generation
                    || (old_generation == generation && old_sequence < sequence)
            }
            (Some(OrderingToken::WallClock(t)), Some(OrderingToken::WallClock(old_t))) => {
                t >= old_t
            }
            // No comparable token on one of the sides.
            _ => true,
        }
    }

    /// Whether the record carries a generation/sequence token.
    pub fn has_ieid(&self) -> bool {
        matches!(self.token, Some(OrderingToken::Ieid { .. }))
    }

    /// Copy every field present on `old` and absent here.
    pub fn merge_from(&mut self, old: &ItemState) {
        if self.status.is_none() {
            self.status = old.status;
        }
        if self.value.is_none() {
            self.value.clone_from(&old.value);
        }
        if self.node.is_none() {
            self.node.clone_from(&old.node);
        }
        if self.t.is_none() {
            self.t = old.t;
        }
        if self.meta.is_none() {
            self.meta.clone_from(&old.meta);
        }
        if self.token.is_none() {
            self.token = old.token;
        }
        for (key, value) in &old.extra {
            if !self.extra.contains_key(key) {
                self.extra.insert(key.clone(), value.clone());
            }
        }
    }
}

fn coerce_numeric(value: &Value) -> Value {
    let Value::String(s) = value else {
        return value.clone();
    };
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return value.clone();
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Number(i.into());
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map_or_else(|| value.clone(), Value::Number)
}

// ── Wire representation ──────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct WireState {
    oid: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    status: Option<Option<i64>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    value: Option<Value>,
    #[serde(
        default,
        alias = "controller_id",
        skip_serializing_if = "Option::is_none"
    )]
    node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    t: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ieid: Option<[u64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    set_time: Option<f64>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Keep explicit `null` distinguishable from an absent field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl TryFrom<WireState> for ItemState {
    type Error = String;

    fn try_from(wire: WireState) -> Result<Self, Self::Error> {
        if wire.oid.is_empty() {
            return Err("state record without oid".into());
        }
        let token = match (wire.ieid, wire.set_time) {
            (Some([generation, sequence]), _) => Some(OrderingToken::Ieid {
                generation,
                sequence,
            }),
            (None, Some(t)) => Some(OrderingToken::WallClock(t)),
            (None, None) => None,
        };
        Ok(Self {
            oid: wire.oid,
            status: wire.status,
            value: wire.value,
            node: wire.node,
            t: wire.t,
            meta: wire.meta,
            token,
            extra: wire.extra,
        })
    }
}

impl From<ItemState> for WireState {
    fn from(state: ItemState) -> Self {
        let (ieid, set_time) = match state.token {
            Some(OrderingToken::Ieid {
                generation,
                sequence,
            }) => (Some([generation, sequence]), None),
            Some(OrderingToken::WallClock(t)) => (None, Some(t)),
            None => (None, None),
        };
        Self {
            oid: state.oid,
            status: state.status,
            value: state.value,
            node: state.node,
            t: state.t,
            meta: state.meta,
            ieid,
            set_time,
            extra: state.extra,
        }
    }
}
