//! Background workers driving the sync engine
//!
//! Three long-running loops share one `SyncEngine` and one cancellation
//! token:
//! - `sync` - claims pending events and applies them
//! - `reconcile` - compares platform snapshots against canonical state
//! - `cleanup` - purges completed events past the retention window
//!
//! Each worker exposes its single pass as a plain method (`process_once`,
//! `reconcile_once`, `cleanup_once`) so tests drive passes directly, and a
//! `run` future that loops the pass on its configured interval until the
//! token is cancelled.

pub mod cleanup;
pub mod reconcile;
pub mod sync;

pub use cleanup::CleanupWorker;
pub use reconcile::ReconcileWorker;
pub use sync::{SyncPassSummary, SyncWorker};
