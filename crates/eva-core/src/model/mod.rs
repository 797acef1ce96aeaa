// ── Domain model ──
//
// Wire-facing data types shared by the store, the dispatcher and the
// supervisor.

mod action;
mod log;
mod server;
mod state;
mod svc;

pub use action::ActionResult;
pub use log::LogRecord;
pub use server::ServerInfo;
pub use state::{ItemState, OrderingToken};
pub use svc::SvcMessage;
