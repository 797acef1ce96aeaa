// ── Client ──
//
// The connection supervisor and application-facing API. Owns the session
// (login token, push channel, timers), routes push frames through the
// dispatcher into the state engine, and exposes state lookups, watchers,
// remote calls and action watching.

mod logs;
mod session;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use eva_api::RpcClient;
use eva_api::transport::{TlsMode, TransportConfig};

use crate::action::{ActionCallback, ActionWatcher};
use crate::bulk::BulkRequest;
use crate::config::{ClientConfig, IntervalId, Intervals, LogSettings, TlsVerification};
use crate::dispatch::{Dispatcher, Frame, HandlerEvent, HandlerId, Propagation};
use crate::engine::{EngineMode, InProcessEngine, StateEngine};
use crate::error::CoreError;
use crate::gateway::{Channel, ChannelConnector, Gateway, WebSocketConnector};
use crate::log::LogPipeline;
use crate::model::{ActionResult, ItemState, ServerInfo};
use crate::store::StateCallback;
use crate::stream::StateStream;

// ── ConnectionState ──────────────────────────────────────────────────

/// Supervisor state, observable through [`Client::connection_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    Disconnected,
    Authenticating,
    /// Logged in; initial state load and heartbeat in progress.
    Syncing,
    /// Timers running.
    Live,
}

/// Time left on an lvar expiration timer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expiry {
    /// The lvar has no expiration configured.
    NoExpiry,
    /// The timer is stopped (status 0).
    Stopped,
    /// The timer has expired (status -1).
    Expired,
    /// Seconds left, never negative.
    Remaining(f64),
}

/// Result of [`Client::lookup`]: a single state for an exact OID, all
/// matching states for a mask.
#[derive(Debug, Clone)]
pub enum StateLookup {
    Single(Option<Arc<ItemState>>),
    Many(Vec<Arc<ItemState>>),
}

// ── Client ───────────────────────────────────────────────────────────

#[derive(Default)]
struct Session {
    token: Option<SecretString>,
    user: Option<String>,
    cancel: CancellationToken,
    channel: Option<Arc<dyn Channel>>,
    tasks: Vec<JoinHandle<()>>,
}

/// HMI client.
///
/// Cheaply cloneable via `Arc<ClientInner>`. Call [`start`](Self::start)
/// to log in and begin synchronizing, [`stop`](Self::stop) to tear the
/// session down. Background tasks hold clones of the client, so a started
/// client lives until it is stopped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    intervals: RwLock<Intervals>,
    log_settings: Mutex<LogSettings>,
    gateway: Arc<dyn Gateway>,
    connector: Arc<dyn ChannelConnector>,
    engine: Arc<dyn StateEngine>,
    dispatcher: Dispatcher,
    log: LogPipeline,
    actions: ActionWatcher,
    session: Mutex<Session>,
    /// Bumped on every login and every stop. Work started under an older
    /// generation is discarded when it completes.
    generation: AtomicU64,
    logged_in: AtomicBool,
    connection_state: watch::Sender<ConnectionState>,
    server_info: ArcSwapOption<ServerInfo>,
    tsdiff: Mutex<Option<f64>>,
    last_snapshot: watch::Sender<Option<DateTime<Utc>>>,
    last_push_frame: watch::Sender<Option<DateTime<Utc>>>,
    restart_task: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Create a client talking to the server over HTTP and WebSocket with
    /// the in-process state engine. Does NOT connect.
    pub fn new(config: ClientConfig) -> Result<Self, CoreError> {
        Self::with_engine(config, Arc::new(InProcessEngine::new()))
    }

    /// Like [`new`](Self::new), with an externally provided state engine.
    pub fn with_engine(config: ClientConfig, engine: Arc<dyn StateEngine>) -> Result<Self, CoreError> {
        let transport = build_transport(&config);
        let rpc = RpcClient::new(&config.api_uri, &transport)?;
        Ok(Self::from_parts(
            config,
            Arc::new(rpc),
            Arc::new(WebSocketConnector),
            engine,
        ))
    }

    /// Assemble a client from its collaborators.
    pub fn from_parts(
        config: ClientConfig,
        gateway: Arc<dyn Gateway>,
        connector: Arc<dyn ChannelConnector>,
        engine: Arc<dyn StateEngine>,
    ) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (last_snapshot, _) = watch::channel(None);
        let (last_push_frame, _) = watch::channel(None);
        Self {
            inner: Arc::new(ClientInner {
                intervals: RwLock::new(config.intervals),
                log_settings: Mutex::new(config.log),
                config,
                gateway,
                connector,
                engine,
                dispatcher: Dispatcher::new(),
                log: LogPipeline::default(),
                actions: ActionWatcher::new(),
                session: Mutex::new(Session::default()),
                generation: AtomicU64::new(0),
                logged_in: AtomicBool::new(false),
                connection_state,
                server_info: ArcSwapOption::empty(),
                tsdiff: Mutex::new(None),
                last_snapshot,
                last_push_frame,
                restart_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> &Arc<dyn StateEngine> {
        &self.inner.engine
    }

    pub fn engine_mode(&self) -> EngineMode {
        self.inner.engine.mode()
    }

    pub(crate) fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.inner.gateway
    }

    // ── Session info ─────────────────────────────────────────────────

    pub fn is_logged_in(&self) -> bool {
        self.inner.logged_in.load(Ordering::SeqCst)
    }

    /// User name reported by the server on login.
    pub fn authorized_user(&self) -> Option<String> {
        self.inner.session.lock().user.clone()
    }

    /// Current session token.
    pub fn token(&self) -> Option<SecretString> {
        self.inner.session.lock().token.clone()
    }

    /// Subscribe to supervisor state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Time of the last applied full state load.
    pub fn last_snapshot(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.inner.last_snapshot.subscribe()
    }

    /// Time of the last received push frame.
    pub fn last_push_frame(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.inner.last_push_frame.subscribe()
    }

    /// Server info from the last successful heartbeat.
    pub fn server_info(&self) -> Option<Arc<ServerInfo>> {
        self.inner.server_info.load_full()
    }

    pub fn system_name(&self) -> Option<String> {
        self.server_info().and_then(|info| info.system_name.clone())
    }

    /// Local clock minus server clock, in seconds.
    pub fn tsdiff(&self) -> Option<f64> {
        *self.inner.tsdiff.lock()
    }

    // ── Intervals ────────────────────────────────────────────────────

    pub fn intervals(&self) -> Intervals {
        *self.inner.intervals.read()
    }

    pub fn interval(&self, id: IntervalId) -> Duration {
        self.inner.intervals.read().get(id)
    }

    /// Change a timer interval. Running timers pick it up on restart.
    pub fn set_interval(&self, id: IntervalId, value: Duration) {
        debug!(interval = %id, ?value, "interval changed");
        self.inner.intervals.write().set(id, value);
    }

    // ── Remote calls ─────────────────────────────────────────────────

    /// Inject the session token as `k`.
    pub(crate) fn prepare_params(&self, params: Value) -> Value {
        let mut map = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return other,
        };
        if let Some(token) = self.token() {
            map.insert("k".into(), Value::String(token.expose_secret().to_owned()));
        }
        Value::Object(map)
    }

    /// Call a server method with the session token.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, CoreError> {
        let params = self.prepare_params(params);
        self.inner.gateway.call(method, params).await
    }

    /// Call a server method addressed to an item (passed as `i`).
    pub async fn call_item(&self, method: &str, oid: &str, params: Value) -> Result<Value, CoreError> {
        let mut map = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        map.insert("i".into(), Value::String(oid.to_owned()));
        self.call(method, Value::Object(map)).await
    }

    /// Start a batch of calls sent in one round trip.
    pub fn bulk(&self) -> BulkRequest<'_> {
        BulkRequest::new(self)
    }

    // ── State access ─────────────────────────────────────────────────

    /// Register a state watcher on an OID or mask. Unless `skip_initial`,
    /// the callback immediately gets the current state.
    pub fn watch(&self, oid_or_mask: &str, callback: StateCallback, skip_initial: bool) {
        self.inner.engine.watch(oid_or_mask, callback, skip_initial);
    }

    /// Remove watchers: all of them, all for a key, or one callback.
    pub fn unwatch(&self, oid_or_mask: Option<&str>, callback: Option<&StateCallback>) {
        self.inner.engine.unwatch(oid_or_mask, callback);
    }

    /// Stream of accepted states for an OID or mask, starting with the
    /// current ones. Dropping the stream removes its watcher.
    pub fn subscribe(&self, oid_or_mask: &str) -> StateStream {
        StateStream::new(Arc::clone(&self.inner.engine), oid_or_mask)
    }

    pub fn state(&self, oid: &str) -> Option<Arc<ItemState>> {
        self.inner.engine.state(oid)
    }

    pub fn states_by_mask(&self, mask: &str) -> Vec<Arc<ItemState>> {
        self.inner.engine.states_by_mask(mask)
    }

    pub fn lookup(&self, oid_or_mask: &str) -> StateLookup {
        if crate::store::is_mask(oid_or_mask) {
            StateLookup::Many(self.states_by_mask(oid_or_mask))
        } else {
            StateLookup::Single(self.state(oid_or_mask))
        }
    }

    pub fn status(&self, oid: &str) -> Option<i64> {
        self.state(oid).and_then(|s| s.status())
    }

    /// Item value, numeric strings coerced to numbers.
    pub fn value(&self, oid: &str) -> Option<Value> {
        self.state(oid).and_then(|s| s.value())
    }

    pub fn statuses_by_mask(&self, mask: &str) -> Vec<(String, Option<i64>)> {
        self.states_by_mask(mask)
            .into_iter()
            .map(|s| (s.oid.clone(), s.status()))
            .collect()
    }

    pub fn values_by_mask(&self, mask: &str) -> Vec<(String, Option<Value>)> {
        self.states_by_mask(mask)
            .into_iter()
            .map(|s| (s.oid.clone(), s.value()))
            .collect()
    }

    /// Seconds left before an lvar timer expires.
    ///
    /// `None` when the item or the server clock offset is unknown.
    pub fn lvar_expires(&self, oid: &str) -> Option<Expiry> {
        let state = self.state(oid)?;
        let expires = state
            .meta
            .as_ref()
            .and_then(|meta| meta.get("expires"))
            .and_then(Value::as_f64)
            .filter(|e| e.abs() > f64::EPSILON);
        let Some(expires) = expires else {
            return Some(Expiry::NoExpiry);
        };
        let tsdiff = self.tsdiff()?;
        match state.status() {
            Some(0) => Some(Expiry::Stopped),
            Some(-1) => Some(Expiry::Expired),
            _ => {
                let set_at = state.t.unwrap_or_default();
                let left = expires - unix_now() + tsdiff + set_at;
                Some(Expiry::Remaining(left.max(0.0)))
            }
        }
    }

    // ── Ingestion entry points ───────────────────────────────────────

    /// Route one raw push frame.
    pub fn process_push_frame(&self, raw: &str) {
        self.inner.last_push_frame.send_replace(Some(Utc::now()));
        self.inner
            .dispatcher
            .dispatch_raw(raw, self.inner.engine.as_ref(), &self.inner.log);
    }

    /// Apply a full state snapshot obtained outside the client.
    pub fn process_polled_snapshot(&self, records: Vec<Value>, clear_unavailable: bool) {
        let states = parse_states(records);
        self.inner.engine.process_snapshot(states, clear_unavailable);
        self.inner.last_snapshot.send_replace(Some(Utc::now()));
    }

    // ── Handlers ─────────────────────────────────────────────────────

    /// Register the application handler for a well-known event, replacing
    /// any previous one.
    pub fn on<F>(&self, id: HandlerId, handler: F)
    where
        F: Fn(HandlerEvent<'_>) + Send + Sync + 'static,
    {
        self.inner.dispatcher.handlers.set(id.into(), Arc::new(handler));
    }

    /// Register a handler under a custom key (`server.<name>` notices,
    /// `supervisor.<name>` frames).
    pub fn on_custom<F>(&self, key: &str, handler: F)
    where
        F: Fn(HandlerEvent<'_>) + Send + Sync + 'static,
    {
        self.inner.dispatcher.handlers.set(key, Arc::new(handler));
    }

    pub fn remove_handler(&self, key: &str) {
        self.inner.dispatcher.handlers.remove(key);
    }

    /// Install the passthrough handler seeing every frame not consumed by
    /// the built-in routes. Returning [`Propagation::Stop`] skips the
    /// default processing of that frame.
    pub fn on_frame<F>(&self, handler: F)
    where
        F: Fn(&Frame) -> Propagation + Send + Sync + 'static,
    {
        self.inner.dispatcher.set_frame_handler(Some(Arc::new(handler)));
    }

    // ── Action watch ─────────────────────────────────────────────────

    /// Watch a server-side action. The callback fires on every status
    /// change until the action finishes or polling fails.
    pub fn watch_action(&self, uuid: Uuid, callback: ActionCallback) {
        if self.inner.actions.register(uuid, callback) {
            let client = self.clone();
            tokio::spawn(async move { client.poll_action(uuid).await });
        }
    }

    /// Wait until a server-side action finishes.
    pub async fn wait_action(&self, uuid: Uuid) -> Result<ActionResult, CoreError> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.watch_action(
            uuid,
            Arc::new(move |outcome: Result<&ActionResult, &CoreError>| {
                let outcome = match outcome {
                    Ok(result) if result.finished => Ok(result.clone()),
                    Ok(_) => return,
                    Err(e) => Err(e.clone()),
                };
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(outcome);
                }
            }),
        );
        rx.await
            .map_err(|_| CoreError::Internal("action watch ended without a result".into()))?
    }

    pub fn watched_actions(&self) -> usize {
        self.inner.actions.len()
    }

    async fn poll_action(&self, uuid: Uuid) {
        loop {
            tokio::time::sleep(self.interval(IntervalId::ActionWatch)).await;
            let result = self
                .call("action.result", json!({ "u": uuid }))
                .await
                .and_then(|v| {
                    serde_json::from_value::<ActionResult>(v).map_err(|e| CoreError::Protocol {
                        message: format!("invalid action result: {e}"),
                    })
                });
            match result {
                Ok(result) => {
                    debug!(%uuid, status = %result.status, finished = result.finished, "action polled");
                    if !self.inner.actions.update(uuid, &result) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(%uuid, error = %e, "action result poll failed");
                    self.inner.actions.fail(uuid, &e);
                    break;
                }
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn build_transport(config: &ClientConfig) -> TransportConfig {
    let tls = match &config.tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
        TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
    };
    TransportConfig {
        tls,
        timeout: config.timeout,
    }
}

/// Parse raw state records, dropping (and logging) malformed ones.
fn parse_states(records: Vec<Value>) -> Vec<ItemState> {
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<ItemState>(record) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, "invalid state record received");
                None
            }
        })
        .collect()
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
