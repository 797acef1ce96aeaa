// ── State storage ──
//
// Backing map for item states and the watcher registry notified on
// every accepted update. Ordering and merge rules live in
// `crate::engine`.

mod mask;
mod registry;
mod state_store;

pub use mask::{is_mask, oid_match};
pub use registry::{StateCallback, WatcherRegistry};
pub(crate) use registry::invoke as invoke_watcher;
pub use state_store::StateStore;
