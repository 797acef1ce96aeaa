// eva-core: State synchronization and event dispatch between eva-api and consumers (CLI).

pub mod action;
pub mod bulk;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod log;
pub mod model;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use action::{ActionCallback, ActionWatcher};
pub use bulk::{BulkPart, BulkRequest, BulkResponse};
pub use client::{Client, ConnectionState, Expiry, StateLookup};
pub use config::{
    ClientConfig, Credentials, IntervalId, Intervals, LogSettings, StateUpdates, TlsVerification,
};
pub use dispatch::{Frame, HandlerEvent, HandlerId, Propagation};
pub use engine::{EngineMode, InProcessEngine, StateEngine};
pub use error::CoreError;
pub use gateway::{Channel, ChannelConnector, Gateway, WebSocketConnector};
pub use store::{StateCallback, is_mask, oid_match};
pub use stream::StateStream;

// Re-export model types at the crate root for ergonomics.
pub use model::{ActionResult, ItemState, LogRecord, OrderingToken, ServerInfo, SvcMessage};

// Transport event type surfaced through `ChannelConnector`.
pub use eva_api::ChannelEvent;
