//! Single-threaded I/O event dispatcher.
//!
//! A [`Dispatcher`] owns a set of watches (single-shot timers, periodic
//! timers, I/O sources and idle tasks) and runs them from
//! [`Dispatcher::monitor`], which blocks in exactly one `poll(2)` per
//! iteration. Every watch is invoked through one callback that also receives
//! the final [`Reason::Cancel`], so owners can release whatever the callback
//! keeps alive.
//!
//! ```no_run
//! use std::time::Duration;
//! use ioxide_reactor::Dispatcher;
//!
//! let dispatcher = Dispatcher::new();
//! dispatcher
//!     .after(Duration::from_millis(500), |_, id, reason| {
//!         println!("{id}: {reason}");
//!         Ok(())
//!     })
//!     .unwrap();
//! dispatcher.monitor(Some(Duration::from_secs(1))).unwrap();
//! ```

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod reason;
pub mod sys;
pub mod watch;

pub use dispatcher::{duration_from_secs, Dispatcher};
pub use error::{ReactorError, Result};
pub use handle::{RawHandle, Registry};
pub use reason::{Interest, Reason};
pub use watch::{Callback, WatchId, WatchKind, WatchState};
