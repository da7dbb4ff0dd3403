//! Single-instance enforcement with argument handoff.
//!
//! The first process to start for an application id writes its pid to
//! `<tmp>/<id>.pid`. Later processes find that pid alive and back off; with
//! a callback registered they first pass their arguments to the running
//! instance:
//!
//! - the second instance writes `<id>.pid.args` under `<id>.pid.args.lock`
//! - it signals the owner (SIGUSR1 by default)
//! - the owner's listener thread consumes the file and runs the callback
//!
//! A pid that no longer answers `kill(pid, 0)` is stale and gets reclaimed.

#[cfg(not(unix))]
compile_error!("sys-single-instance relies on POSIX signals and only supports unix targets");

mod claim;
mod config;
mod error;
mod handoff;
mod listener;
pub mod liveness;
mod paths;
mod signal;

pub use claim::{InstanceLock, Ownership};
pub use config::{RetryPolicy, Timing};
pub use error::{Error, Result};
pub use handoff::{HandoffLock, HandoffStatus};
pub use paths::{ClaimPaths, Location};
pub use signal::{ParseSignalError, WakeSignal};
