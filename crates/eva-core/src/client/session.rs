// ── Session lifecycle ──
//
// Login, initial sync, push channel, periodic timers, liveness probing,
// stop and restart.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use eva_api::ChannelEvent;

use super::{Client, ConnectionState, parse_states, unix_now};
use crate::config::{Credentials, IntervalId};
use crate::dispatch::{HandlerEvent, HandlerId};
use crate::error::CoreError;
use crate::model::{ServerInfo, SvcMessage};

/// Remote error code carrying a service message.
const CODE_SERVICE_MESSAGE: i64 = -32022;

const CLOSE_RETRY_DELAY: Duration = Duration::from_secs(1);

impl Client {
    // ── Start ────────────────────────────────────────────────────────

    /// Log in and start synchronizing.
    ///
    /// Loads the full state, probes the server, opens the push channel (in
    /// push mode) and starts the timers. A failed login leaves the client
    /// disconnected and fires `login.failed`; it is not retried.
    pub async fn start(&self) -> Result<(), CoreError> {
        self.cancel_scheduled_restart();
        self.start_session().await
    }

    async fn start_session(&self) -> Result<(), CoreError> {
        if self.is_logged_in() {
            debug!("already logged in");
            return Ok(());
        }
        let inner = &self.inner;
        inner.dispatcher.liveness.reset();
        inner
            .connection_state
            .send_replace(ConnectionState::Authenticating);

        let reply = match inner.gateway.call("login", self.login_payload()).await {
            Ok(reply) => reply,
            Err(e) => return Err(self.login_failed(e)),
        };
        let (token, user) = match parse_login_reply(&reply) {
            Ok(parsed) => parsed,
            Err(e) => return Err(self.login_failed(e)),
        };

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        {
            let mut session = inner.session.lock();
            session.token = Some(token);
            session.user.clone_from(&user);
            session.cancel = cancel.clone();
        }
        inner.connection_state.send_replace(ConnectionState::Syncing);

        if inner.config.push_mode {
            match self.open_channel() {
                Ok(events) => {
                    let task = self.spawn_channel_task(generation, &cancel, events);
                    inner.session.lock().tasks.push(task);
                }
                Err(e) => return Err(self.login_failed(e)),
            }
        }

        let (states, heartbeat) = tokio::join!(
            self.load_states(generation),
            self.heartbeat(generation, true)
        );
        if let Err(e) = states.and(heartbeat) {
            return Err(self.login_failed(e));
        }
        if self.is_stale(generation) {
            debug!("session stopped during initial sync");
            return Err(CoreError::NotLoggedIn);
        }

        let timers = self.spawn_timers(generation, &cancel);
        inner.session.lock().tasks.extend(timers);
        inner.logged_in.store(true, Ordering::SeqCst);
        inner.connection_state.send_replace(ConnectionState::Live);
        info!(user = user.as_deref().unwrap_or("-"), "login successful");
        inner
            .dispatcher
            .handlers
            .invoke_id(HandlerId::LoginSuccess, HandlerEvent::Empty);
        Ok(())
    }

    fn login_payload(&self) -> Value {
        let config = &self.inner.config;
        let mut payload = Map::new();
        let with_xopts = |payload: &mut Map<String, Value>| {
            if let Some(ref xopts) = config.login_xopts {
                payload.insert("xopts".into(), xopts.clone());
            }
        };
        match &config.credentials {
            Credentials::ApiKey(key) => {
                debug!("logging in with API key");
                payload.insert("k".into(), key.expose_secret().into());
                with_xopts(&mut payload);
            }
            Credentials::Password {
                login,
                password,
                token,
            } => {
                debug!(login = %login, "logging in with password");
                payload.insert("u".into(), login.as_str().into());
                payload.insert("p".into(), password.expose_secret().into());
                let token = token.clone().or_else(|| self.token());
                if let Some(token) = token {
                    payload.insert("a".into(), token.expose_secret().into());
                }
                with_xopts(&mut payload);
            }
            Credentials::Token(token) => {
                debug!("logging in with existing token");
                payload.insert("a".into(), token.expose_secret().into());
            }
            Credentials::Anonymous => debug!("logging in without credentials"),
        }
        Value::Object(payload)
    }

    /// Tear down after a failed login and report it.
    fn login_failed(&self, err: CoreError) -> CoreError {
        warn!(code = err.code(), error = %err, "login failed");
        self.inner.logged_in.store(false, Ordering::SeqCst);
        self.stop_engine();
        self.handle_service_error(&err);
        {
            let mut session = self.inner.session.lock();
            session.token = None;
            session.user = None;
        }
        self.inner
            .dispatcher
            .handlers
            .invoke_id(HandlerId::LoginFailed, HandlerEvent::Error(&err));
        err.into_auth_failure()
    }

    /// Fire the OTP handlers for service messages carried by `err`.
    fn handle_service_error(&self, err: &CoreError) {
        let CoreError::Remote { code, message, .. } = err else {
            return;
        };
        if *code != CODE_SERVICE_MESSAGE {
            return;
        }
        let Some(msg) = SvcMessage::parse(message) else {
            return;
        };
        if msg.kind != "OTP" {
            return;
        }
        let id = match msg.message.as_deref() {
            Some("REQ") => HandlerId::LoginOtpRequired,
            Some("INVALID") => HandlerId::LoginOtpInvalid,
            Some("SETUP") => HandlerId::LoginOtpSetup,
            _ => return,
        };
        self.inner
            .dispatcher
            .handlers
            .invoke_id(id, HandlerEvent::Service(&msg));
    }

    // ── Stop / restart ───────────────────────────────────────────────

    /// Stop the session. Unless `keep_auth`, the server session is logged
    /// out and the token erased.
    pub async fn stop(&self, keep_auth: bool) -> Result<(), CoreError> {
        self.cancel_scheduled_restart();
        self.shutdown(keep_auth).await
    }

    async fn shutdown(&self, keep_auth: bool) -> Result<(), CoreError> {
        self.inner.logged_in.store(false, Ordering::SeqCst);
        self.stop_engine();
        debug!(keep_auth, "client stopped");
        if keep_auth {
            return Ok(());
        }
        let token = {
            let mut session = self.inner.session.lock();
            session.user = None;
            session.token.take()
        };
        if let Some(token) = token {
            self.inner
                .gateway
                .call("logout", json!({ "a": token.expose_secret() }))
                .await?;
        }
        Ok(())
    }

    /// Tear the session down and log in again after the restart interval.
    pub fn restart(&self) {
        self.cancel_scheduled_restart();
        debug!("performing restart");
        let client = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = client.shutdown(true).await {
                debug!(error = %e, "stop before restart failed");
            }
            tokio::time::sleep(client.interval(IntervalId::Restart)).await;
            if let Err(e) = client.start_session().await {
                warn!(error = %e, "restart failed");
            }
        });
        *self.inner.restart_task.lock() = Some(handle);
    }

    fn cancel_scheduled_restart(&self) {
        if let Some(handle) = self.inner.restart_task.lock().take() {
            handle.abort();
        }
    }

    /// Stop timers and the push channel, and drop session state.
    fn stop_engine(&self) {
        let inner = &self.inner;
        inner.generation.fetch_add(1, Ordering::SeqCst);
        let (channel, tasks) = {
            let mut session = inner.session.lock();
            session.cancel.cancel();
            (session.channel.take(), std::mem::take(&mut session.tasks))
        };
        for task in tasks {
            task.abort();
        }
        inner.engine.reset_states();
        inner.server_info.store(None);
        *inner.tsdiff.lock() = None;
        inner.log.reset();
        inner.dispatcher.liveness.reset();
        if let Some(channel) = channel {
            if let Err(e) = channel.close() {
                debug!(error = %e, "push channel close failed, retrying later");
                tokio::spawn(async move {
                    tokio::time::sleep(CLOSE_RETRY_DELAY).await;
                    if let Err(e) = channel.close() {
                        trace!(error = %e, "push channel close retry failed");
                    }
                });
            }
        }
        inner
            .connection_state
            .send_replace(ConnectionState::Disconnected);
    }

    pub(crate) fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn is_stale(&self, generation: u64) -> bool {
        self.generation() != generation
    }

    // ── Initial sync and heartbeat ───────────────────────────────────

    /// Full state load (`item.state`), unless state updates are disabled.
    pub(crate) async fn load_states(&self, generation: u64) -> Result<(), CoreError> {
        let Some(query) = self.inner.config.state_updates.state_query() else {
            return Ok(());
        };
        let result = self
            .call("item.state", json!({ "full": true, "i": query }))
            .await?;
        if self.is_stale(generation) {
            debug!("dropping state load of a previous session");
            return Ok(());
        }
        let Value::Array(records) = result else {
            return Err(CoreError::Protocol {
                message: "item.state did not return a list".into(),
            });
        };
        let states = parse_states(records);
        self.inner
            .engine
            .process_snapshot(states, self.inner.config.clear_unavailable);
        self.inner.last_snapshot.send_replace(Some(Utc::now()));
        Ok(())
    }

    /// Liveness probe.
    ///
    /// In push mode, an unanswered ping older than one heartbeat interval
    /// fires `heartbeat.error`, then a new ping is sent. The `test` call
    /// refreshes server info and the clock offset.
    pub(crate) async fn heartbeat(&self, generation: u64, on_login: bool) -> Result<(), CoreError> {
        let inner = &self.inner;
        if on_login {
            inner.dispatcher.liveness.reset();
        }
        if inner.config.push_mode && !on_login {
            if inner
                .dispatcher
                .liveness
                .is_overdue(self.interval(IntervalId::Heartbeat))
            {
                warn!("push channel ping timeout");
                self.heartbeat_failed(None);
            }
            let channel = inner.session.lock().channel.clone();
            if let Some(channel) = channel {
                inner.dispatcher.liveness.ping();
                trace!("push channel ping");
                if let Err(e) = channel.send(&json!({ "m": "ping" })) {
                    warn!(error = %e, "unable to send push channel ping");
                    self.heartbeat_failed(Some(&e));
                    return Err(e);
                }
            }
        }

        match self.call("test", json!({})).await {
            Ok(reply) => {
                if self.is_stale(generation) {
                    return Ok(());
                }
                let info: ServerInfo =
                    serde_json::from_value(reply).map_err(|e| CoreError::Protocol {
                        message: format!("invalid server info: {e}"),
                    })?;
                *inner.tsdiff.lock() = Some(unix_now() - info.time);
                inner.server_info.store(Some(Arc::new(info)));
                inner
                    .dispatcher
                    .handlers
                    .invoke_id(HandlerId::HeartbeatSuccess, HandlerEvent::Empty);
                Ok(())
            }
            Err(e) => {
                if self.is_stale(generation) {
                    return Ok(());
                }
                // During login the failure is reported as a login failure.
                if !on_login {
                    warn!(error = %e, "heartbeat call failed");
                    self.heartbeat_failed(Some(&e));
                }
                Err(e)
            }
        }
    }

    /// `heartbeat.error`, or a restart when no handler is registered.
    fn heartbeat_failed(&self, err: Option<&CoreError>) {
        let event = err.map_or(HandlerEvent::Empty, HandlerEvent::Error);
        if !self
            .inner
            .dispatcher
            .handlers
            .invoke_id(HandlerId::HeartbeatError, event)
        {
            self.restart();
        }
    }

    // ── Push channel ─────────────────────────────────────────────────

    fn open_channel(&self) -> Result<mpsc::UnboundedReceiver<ChannelEvent>, CoreError> {
        let token = self.token().ok_or(CoreError::NotLoggedIn)?;
        let mut config = self.inner.config.clone();
        config.intervals = self.intervals();
        let url = config.push_url(token.expose_secret())?;
        let (channel, events) = self.inner.connector.open(url);
        self.inner.session.lock().channel = Some(channel);
        Ok(events)
    }

    fn on_channel_open(&self) {
        debug!("push channel connected");
        let channel = self.inner.session.lock().channel.clone();
        let Some(channel) = channel else {
            return;
        };
        if let Some(masks) = self.inner.config.state_updates.masks() {
            if let Err(e) = channel.send(&json!({ "m": "subscribe.state", "p": masks })) {
                warn!(error = %e, "unable to subscribe to state updates");
            }
        }
        if self.inner.log.is_subscribed() {
            let client = self.clone();
            let level = self.log_settings().level;
            tokio::spawn(async move {
                let _ = client.set_log_level(level).await;
            });
        }
    }

    /// Send a frame on the current push channel, if any.
    pub(crate) fn send_frame(&self, frame: &Value) -> Result<(), CoreError> {
        let channel = self.inner.session.lock().channel.clone();
        match channel {
            Some(channel) => channel.send(frame),
            None => Ok(()),
        }
    }

    fn spawn_channel_task(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> JoinHandle<()> {
        let client = self.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        if client.is_stale(generation) {
                            break;
                        }
                        match event {
                            ChannelEvent::Opened => client.on_channel_open(),
                            ChannelEvent::Frame(text) => client.process_push_frame(&text),
                            ChannelEvent::Closed { code, reason } => {
                                warn!(?code, %reason, "push channel closed");
                            }
                            ChannelEvent::Failed(reason) => {
                                warn!(%reason, "push channel failed");
                            }
                        }
                    }
                }
            }
            trace!("push channel task exiting");
        })
    }

    // ── Timers ───────────────────────────────────────────────────────

    fn spawn_timers(&self, generation: u64, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        let reload = if self.inner.config.push_mode {
            self.interval(IntervalId::Reload)
        } else {
            self.interval(IntervalId::PollReload)
        };
        if !reload.is_zero() {
            let client = self.clone();
            tasks.push(spawn_periodic(reload, cancel.clone(), move || {
                let client = client.clone();
                async move {
                    if let Err(e) = client.load_states(generation).await {
                        warn!(error = %e, "periodic state reload failed");
                    }
                }
            }));
        }
        let heartbeat = self.interval(IntervalId::Heartbeat);
        if !heartbeat.is_zero() {
            let client = self.clone();
            tasks.push(spawn_periodic(heartbeat, cancel.clone(), move || {
                let client = client.clone();
                async move {
                    let _ = client.heartbeat(generation, false).await;
                }
            }));
        }
        tasks
    }
}

/// Run `tick` every `period` until cancelled. The first tick fires one
/// period after the start.
pub(super) fn spawn_periodic<F, Fut>(
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => tick().await,
            }
        }
    })
}

fn parse_login_reply(reply: &Value) -> Result<(SecretString, Option<String>), CoreError> {
    let token = reply
        .get("token")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::Protocol {
            message: "login reply carries no token".into(),
        })?;
    let user = reply.get("user").and_then(Value::as_str).map(str::to_owned);
    Ok((SecretString::from(token.to_owned()), user))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn login_reply_needs_a_token() {
        let (token, user) =
            parse_login_reply(&json!({"token": "t1", "user": "operator"})).unwrap();
        assert_eq!(token.expose_secret(), "t1");
        assert_eq!(user.as_deref(), Some("operator"));
        let err = parse_login_reply(&json!({"user": "operator"})).unwrap_err();
        assert_eq!(err.code(), -32009);
    }
}
