// ── Server log processing ──

use serde_json::json;
use tracing::{debug, error, warn};

use super::Client;
use super::session::spawn_periodic;
use crate::config::{IntervalId, LogSettings};
use crate::error::CoreError;
use crate::model::LogRecord;

impl Client {
    pub fn log_settings(&self) -> LogSettings {
        *self.inner.log_settings.lock()
    }

    /// Start delivering server log records through the `log.record` and
    /// `log.postprocess` handlers. Must be called after login.
    ///
    /// Loads the backlog. When polling, the backlog is reloaded every
    /// `log_reload`; in push mode new records arrive on the channel.
    pub async fn log_start(&self, level: Option<u32>) -> Result<(), CoreError> {
        if let Some(level) = level {
            self.inner.log_settings.lock().level = level;
        }
        let push_mode = self.inner.config.push_mode;
        if !self.inner.log.start(push_mode) {
            return Ok(());
        }
        let generation = self.generation();
        if !push_mode {
            let period = self.interval(IntervalId::LogReload);
            let cancel = self.inner.session.lock().cancel.clone();
            if !period.is_zero() {
                let client = self.clone();
                let task = spawn_periodic(period, cancel, move || {
                    let client = client.clone();
                    async move {
                        let _ = client.load_log_entries(generation, false).await;
                    }
                });
                self.inner.session.lock().tasks.push(task);
            }
        }
        self.load_log_entries(generation, true).await
    }

    /// Change the log level: re-subscribe on the push channel and reload
    /// the backlog.
    pub async fn set_log_level(&self, level: u32) -> Result<(), CoreError> {
        self.inner.log_settings.lock().level = level;
        self.subscribe_log(level);
        self.load_log_entries(self.generation(), true).await
    }

    fn subscribe_log(&self, level: u32) {
        self.inner.log.set_subscribed();
        if let Err(e) = self.send_frame(&json!({ "m": "subscribe.log", "p": level })) {
            warn!(error = %e, "unable to subscribe to log records");
        }
    }

    /// Load the log backlog (`log.get`) and deliver it, followed by any
    /// records buffered from the push channel.
    async fn load_log_entries(&self, generation: u64, postprocess: bool) -> Result<(), CoreError> {
        let push_mode = self.inner.config.push_mode;
        if push_mode {
            self.inner.log.begin_load();
        }
        let settings = self.log_settings();
        let reply = self
            .call(
                "log.get",
                json!({ "l": settings.level, "n": settings.records }),
            )
            .await
            .and_then(|v| {
                serde_json::from_value::<Vec<LogRecord>>(v).map_err(|e| CoreError::Protocol {
                    message: format!("invalid log records: {e}"),
                })
            });
        let records = match reply {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "unable to load log entries");
                return Err(e);
            }
        };
        if self.is_stale(generation) {
            debug!("dropping log load of a previous session");
            return Ok(());
        }
        if push_mode && self.inner.log.is_first_load() {
            self.subscribe_log(settings.level);
        }
        debug!(count = records.len(), "log backlog loaded");
        self.inner
            .log
            .complete_load(&records, postprocess, &self.inner.dispatcher.handlers);
        Ok(())
    }
}
