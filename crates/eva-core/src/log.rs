// ── Log pipeline ──
//
// Server log records reach the application through the `log.record` and
// `log.postprocess` handlers. Records pushed before the backlog has loaded
// are held back and flushed, in arrival order, right after the backlog.

use parking_lot::Mutex;
use tracing::trace;

use crate::dispatch::{HandlerEvent, HandlerId, HandlerRegistry};
use crate::model::LogRecord;

#[derive(Debug, Default)]
#[allow(clippy::struct_excessive_bools)]
struct LogState {
    started: bool,
    loaded: bool,
    backlog_seen: bool,
    subscribed: bool,
    pending: Vec<LogRecord>,
}

#[derive(Debug, Default)]
pub struct LogPipeline {
    state: Mutex<LogState>,
}

impl LogPipeline {
    /// Mark the pipeline started. Returns whether a backlog load is due:
    /// always when polling, only for the first load in push mode.
    pub(crate) fn start(&self, push_mode: bool) -> bool {
        let mut state = self.state.lock();
        state.started = true;
        if !push_mode || !state.backlog_seen {
            state.loaded = false;
            return true;
        }
        false
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    pub(crate) fn is_subscribed(&self) -> bool {
        self.state.lock().subscribed
    }

    pub(crate) fn set_subscribed(&self) {
        self.state.lock().subscribed = true;
    }

    /// Whether no backlog has been delivered yet in this session.
    pub(crate) fn is_first_load(&self) -> bool {
        !self.state.lock().backlog_seen
    }

    /// Drop records buffered from an earlier load cycle.
    pub(crate) fn begin_load(&self) {
        self.state.lock().pending.clear();
    }

    /// Session teardown. Clears the loaded state and buffered records.
    ///
    /// The started/subscribed flags are kept, unlike a full stop of the
    /// pipeline: a restarted session re-subscribes to logs and reloads
    /// the backlog without the application calling `log_start` again.
    pub(crate) fn reset(&self) {
        let mut state = self.state.lock();
        state.loaded = false;
        state.backlog_seen = false;
        state.pending.clear();
    }

    /// Deliver a loaded backlog, then the buffered push records, then
    /// (optionally) the postprocess notification.
    pub(crate) fn complete_load(
        &self,
        backlog: &[LogRecord],
        postprocess: bool,
        handlers: &HandlerRegistry,
    ) {
        for record in backlog {
            handlers.invoke_id(HandlerId::LogRecord, HandlerEvent::Log(record));
        }
        let pending = {
            let mut state = self.state.lock();
            state.loaded = true;
            state.backlog_seen = true;
            std::mem::take(&mut state.pending)
        };
        for record in &pending {
            handlers.invoke_id(HandlerId::LogRecord, HandlerEvent::Log(record));
        }
        if postprocess {
            handlers.invoke_id(HandlerId::LogPostprocess, HandlerEvent::Empty);
        }
    }

    /// Records from the push channel. Held back until the backlog has
    /// loaded; delivered directly (plus postprocess) afterwards.
    pub(crate) fn push_records(&self, records: Vec<LogRecord>, handlers: &HandlerRegistry) {
        if records.is_empty() {
            return;
        }
        {
            let mut state = self.state.lock();
            if !state.loaded {
                trace!(count = records.len(), "log records buffered until backlog loads");
                state.pending.extend(records);
                return;
            }
        }
        for record in &records {
            handlers.invoke_id(HandlerId::LogRecord, HandlerEvent::Log(record));
        }
        handlers.invoke_id(HandlerId::LogPostprocess, HandlerEvent::Empty);
    }
}
