// ── Event dispatcher ──
//
// Named application handlers, the veto-capable frame passthrough, liveness
// bookkeeping and the routing of inbound push frames. Routing is first
// match wins: pong, reload notice, server notice, supervisor frames, the
// passthrough (which may stop further processing), state, log.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::Value;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::engine::StateEngine;
use crate::error::CoreError;
use crate::log::LogPipeline;
use crate::model::{LogRecord, SvcMessage};

/// Well-known handler names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
pub enum HandlerId {
    #[strum(serialize = "heartbeat.success")]
    HeartbeatSuccess,
    /// Liveness failure. Without a handler the client restarts itself.
    #[strum(serialize = "heartbeat.error")]
    HeartbeatError,
    #[strum(serialize = "login.success")]
    LoginSuccess,
    #[strum(serialize = "login.failed")]
    LoginFailed,
    #[strum(serialize = "login.otp_required")]
    LoginOtpRequired,
    #[strum(serialize = "login.otp_invalid")]
    LoginOtpInvalid,
    #[strum(serialize = "login.otp_setup")]
    LoginOtpSetup,
    #[strum(serialize = "server.reload")]
    ServerReload,
    #[strum(serialize = "server.restart")]
    ServerRestart,
    #[strum(serialize = "log.record")]
    LogRecord,
    #[strum(serialize = "log.postprocess")]
    LogPostprocess,
}

/// Payload handed to an application handler.
#[derive(Debug, Clone, Copy)]
pub enum HandlerEvent<'a> {
    Empty,
    Error(&'a CoreError),
    Data(&'a Value),
    Log(&'a LogRecord),
    Service(&'a SvcMessage),
}

pub type Handler = Arc<dyn Fn(HandlerEvent<'_>) + Send + Sync>;

/// Result of the frame passthrough handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    #[default]
    Continue,
    /// Skip default processing of this frame.
    Stop,
}

pub type FrameHandler = Arc<dyn Fn(&Frame) -> Propagation + Send + Sync>;

/// An inbound push frame: `{"s": kind, "d": data}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Frame {
    #[serde(rename = "s")]
    pub kind: String,
    #[serde(rename = "d", default)]
    pub data: Value,
}

impl Frame {
    /// Data as a list of records: arrays as-is, anything else as one item.
    fn records(&self) -> Vec<&Value> {
        match &self.data {
            Value::Array(items) => items.iter().collect(),
            Value::Null => Vec::new(),
            other => vec![other],
        }
    }
}

// ── Handler registry ─────────────────────────────────────────────────

/// One handler per name. Keys are [`HandlerId`] names or custom ones
/// (`server.<name>`, `supervisor.<name>`).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn set(&self, key: &str, handler: Handler) {
        self.handlers.insert(key.to_owned(), handler);
    }

    pub fn remove(&self, key: &str) {
        self.handlers.remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// Invoke the handler registered under `key`. Returns whether one was
    /// registered. A panicking handler is logged and swallowed.
    pub fn invoke(&self, key: &str, event: HandlerEvent<'_>) -> bool {
        // Clone out so the handler may (re)register handlers itself.
        let Some(handler) = self.handlers.get(key).map(|h| Arc::clone(h.value())) else {
            trace!(handler = key, "no handler registered");
            return false;
        };
        debug!(handler = key, "invoking handler");
        if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
            error!(handler = key, "handler panicked");
        }
        true
    }

    pub fn invoke_id(&self, id: HandlerId, event: HandlerEvent<'_>) -> bool {
        self.invoke(id.into(), event)
    }
}

// ── Liveness ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Pings {
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
}

/// Ping/pong timestamps of the push channel.
#[derive(Debug, Default)]
pub(crate) struct Liveness {
    pings: Mutex<Pings>,
}

impl Liveness {
    pub(crate) fn reset(&self) {
        *self.pings.lock() = Pings::default();
    }

    pub(crate) fn ping(&self) {
        self.pings.lock().last_ping = Some(Instant::now());
    }

    pub(crate) fn pong(&self) {
        self.pings.lock().last_pong = Some(Instant::now());
    }

    /// Whether the last ping has gone unanswered for longer than one
    /// heartbeat interval.
    pub(crate) fn is_overdue(&self, heartbeat: Duration) -> bool {
        let pings = self.pings.lock();
        match (pings.last_ping, pings.last_pong) {
            (Some(_), None) => true,
            (Some(ping), Some(pong)) => ping.saturating_duration_since(pong) > heartbeat,
            (None, _) => false,
        }
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct Dispatcher {
    pub(crate) handlers: HandlerRegistry,
    frame_handler: RwLock<Option<FrameHandler>>,
    pub(crate) liveness: Liveness,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Install (or with `None` remove) the frame passthrough handler.
    pub fn set_frame_handler(&self, handler: Option<FrameHandler>) {
        *self.frame_handler.write() = handler;
    }

    fn passthrough(&self, frame: &Frame) -> Propagation {
        let Some(handler) = self.frame_handler.read().clone() else {
            return Propagation::Continue;
        };
        match catch_unwind(AssertUnwindSafe(|| handler(frame))) {
            Ok(propagation) => propagation,
            Err(_) => {
                error!(kind = %frame.kind, "frame handler panicked");
                Propagation::Continue
            }
        }
    }

    /// Parse and route one raw push frame. Malformed frames are logged and
    /// dropped.
    pub fn dispatch_raw(&self, raw: &str, engine: &dyn StateEngine, log: &LogPipeline) {
        if raw.is_empty() {
            return;
        }
        match serde_json::from_str::<Frame>(raw) {
            Ok(frame) => self.dispatch(&frame, engine, log),
            Err(e) => warn!(error = %e, "invalid push frame received"),
        }
    }

    pub fn dispatch(&self, frame: &Frame, engine: &dyn StateEngine, log: &LogPipeline) {
        trace!(kind = %frame.kind, "push frame");
        match frame.kind.as_str() {
            "pong" => self.liveness.pong(),
            "reload" => {
                self.handlers
                    .invoke_id(HandlerId::ServerReload, HandlerEvent::Empty);
            }
            "server" => match frame.data.as_str() {
                Some(name) => {
                    self.handlers
                        .invoke(&format!("server.{name}"), HandlerEvent::Empty);
                }
                None => warn!(data = %frame.data, "server notice without a name"),
            },
            kind if kind.starts_with("supervisor.") => {
                self.handlers.invoke(kind, HandlerEvent::Data(&frame.data));
            }
            _ => {
                if self.passthrough(frame) == Propagation::Stop {
                    trace!(kind = %frame.kind, "frame processing stopped by handler");
                    return;
                }
                self.dispatch_default(frame, engine, log);
            }
        }
    }

    fn dispatch_default(&self, frame: &Frame, engine: &dyn StateEngine, log: &LogPipeline) {
        match frame.kind.as_str() {
            "state" => {
                for record in frame.records() {
                    engine.ingest(record.clone(), true);
                }
            }
            "log" => {
                let records = frame
                    .records()
                    .into_iter()
                    .filter_map(|r| match serde_json::from_value::<LogRecord>(r.clone()) {
                        Ok(record) => Some(record),
                        Err(e) => {
                            warn!(error = %e, "invalid log record received");
                            None
                        }
                    })
                    .collect();
                log.push_records(records, &self.handlers);
            }
            other => trace!(kind = other, "unhandled push frame"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::engine::InProcessEngine;

    fn counting(registry: &HandlerRegistry, key: &str) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        registry.set(
            key,
            Arc::new(move |_: HandlerEvent<'_>| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        hits
    }

    #[test]
    fn handler_ids_use_dotted_names() {
        assert_eq!(HandlerId::HeartbeatError.to_string(), "heartbeat.error");
        assert_eq!(
            "login.otp_required".parse::<HandlerId>().unwrap(),
            HandlerId::LoginOtpRequired
        );
    }

    #[test]
    fn panicking_handler_is_contained() {
        let registry = HandlerRegistry::default();
        registry.set("x", Arc::new(|_: HandlerEvent<'_>| panic!("boom")));
        assert!(registry.invoke("x", HandlerEvent::Empty));
        assert!(!registry.invoke("y", HandlerEvent::Empty));
    }

    #[test]
    fn routes_notices_by_name() {
        let dispatcher = Dispatcher::new();
        let engine = InProcessEngine::new();
        let log = LogPipeline::default();
        let reload = counting(&dispatcher.handlers, "server.reload");
        let restart = counting(&dispatcher.handlers, "server.restart");
        let custom = counting(&dispatcher.handlers, "server.maintenance");
        let sup = counting(&dispatcher.handlers, "supervisor.lock");

        dispatcher.dispatch_raw(r#"{"s":"reload"}"#, &engine, &log);
        dispatcher.dispatch_raw(r#"{"s":"server","d":"restart"}"#, &engine, &log);
        dispatcher.dispatch_raw(r#"{"s":"server","d":"maintenance"}"#, &engine, &log);
        dispatcher.dispatch_raw(r#"{"s":"supervisor.lock","d":{"u":"op"}}"#, &engine, &log);

        assert_eq!(reload.load(Ordering::SeqCst), 1);
        assert_eq!(restart.load(Ordering::SeqCst), 1);
        assert_eq!(custom.load(Ordering::SeqCst), 1);
        assert_eq!(sup.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn passthrough_can_veto_state_frames() {
        let dispatcher = Dispatcher::new();
        let engine = InProcessEngine::new();
        let log = LogPipeline::default();
        engine.apply_update(
            serde_json::from_value(json!({"oid": "unit:a", "status": 0})).unwrap(),
            false,
        );

        dispatcher.set_frame_handler(Some(Arc::new(|f: &Frame| {
            if f.kind == "state" {
                Propagation::Stop
            } else {
                Propagation::Continue
            }
        })));
        dispatcher.dispatch_raw(r#"{"s":"state","d":{"oid":"unit:a","status":1}}"#, &engine, &log);
        assert_eq!(engine.state("unit:a").unwrap().status(), Some(0));

        dispatcher.set_frame_handler(None);
        dispatcher.dispatch_raw(
            r#"{"s":"state","d":[{"oid":"unit:a","status":1},{"oid":"unit:new","status":1}]}"#,
            &engine,
            &log,
        );
        assert_eq!(engine.state("unit:a").unwrap().status(), Some(1));
        // Deltas never create items.
        assert!(engine.state("unit:new").is_none());
    }

    #[test]
    fn pong_frames_feed_liveness() {
        let dispatcher = Dispatcher::new();
        let engine = InProcessEngine::new();
        let log = LogPipeline::default();
        dispatcher.liveness.ping();
        assert!(dispatcher.liveness.is_overdue(Duration::from_secs(5)));
        dispatcher.dispatch_raw(r#"{"s":"pong"}"#, &engine, &log);
        assert!(!dispatcher.liveness.is_overdue(Duration::from_secs(5)));
    }

    #[test]
    fn garbage_frames_are_ignored() {
        let dispatcher = Dispatcher::new();
        let engine = InProcessEngine::new();
        let log = LogPipeline::default();
        dispatcher.dispatch_raw("", &engine, &log);
        dispatcher.dispatch_raw("not json", &engine, &log);
        dispatcher.dispatch_raw(r#"{"d":1}"#, &engine, &log);
        assert!(engine.is_empty());
    }
}
