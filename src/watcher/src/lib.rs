//! Watchz Watcher - the update engine.
//!
//! Ties the engine client and registry client together into the scan loop:
//! select which containers are in scope, detect manifest drift, and drive
//! the per-container update state machine (pull, stop, remove, recreate,
//! reattach, start) with rollback at the boundaries where the old workload
//! can still be saved. One [`watchz_core::SessionReport`] is produced per
//! scan tick and handed to the configured notifiers.

pub mod notify;
pub mod scheduler;
pub mod selector;
pub mod session;
pub mod update;

pub use notify::{NotificationDispatcher, Notifier};
pub use selector::{select, Selection};
pub use session::EventSink;
pub use update::Watcher;
