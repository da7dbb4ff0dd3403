//! Null-signal liveness probe.
//!
//! `kill(pid, 0)` performs the permission and existence checks without
//! delivering anything. Only a clean success counts as alive: a process we
//! cannot signal is treated like a dead one so a stale claim gets reclaimed
//! instead of blocking every later start.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Exists and can be signalled by this user.
    Alive,
    /// No such process (ESRCH).
    Missing,
    /// Exists but belongs to someone else (EPERM).
    Inaccessible,
    /// Not a usable pid: zero, or too large for `pid_t`.
    Invalid,
    /// Any other probe failure.
    Unknown(Errno),
}

impl Liveness {
    pub fn is_alive(self) -> bool {
        self == Liveness::Alive
    }
}

/// Converts a recorded pid into a target that addresses exactly one process.
///
/// Zero and negative values would address process groups in `kill(2)`.
pub(crate) fn target(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

pub fn probe(pid: u32) -> Liveness {
    let Some(target) = target(pid) else {
        return Liveness::Invalid;
    };
    match kill(target, None) {
        Ok(()) => Liveness::Alive,
        Err(Errno::ESRCH) => Liveness::Missing,
        Err(Errno::EPERM) => Liveness::Inaccessible,
        Err(errno) => Liveness::Unknown(errno),
    }
}

pub fn is_alive(pid: u32) -> bool {
    probe(pid).is_alive()
}
