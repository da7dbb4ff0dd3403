use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::config::Timing;
use crate::error::{Error, IoContext, Result};
use crate::handoff::{self, remove_if_present, HandoffStatus};
use crate::listener::{self, Callback, Listener, SharedCallback};
use crate::liveness;
use crate::paths::{scratch, with_suffix, ClaimPaths, Location};
use crate::signal::WakeSignal;

/// Outcome of [`InstanceLock::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// This process holds the claim.
    First { pid: u32 },
    /// Another live process holds it.
    Secondary { pid: u32, handoff: HandoffStatus },
}

impl Ownership {
    pub fn is_first(&self) -> bool {
        matches!(self, Ownership::First { .. })
    }

    /// Pid of the effective first instance.
    pub fn first_pid(&self) -> u32 {
        match self {
            Ownership::First { pid } | Ownership::Secondary { pid, .. } => *pid,
        }
    }
}

/// What the identity file says.
#[derive(Debug, PartialEq, Eq)]
enum Recorded {
    Absent,
    Pid(u32),
    Malformed(String),
}

/// Per-process handle on the single-instance claim for one application id.
///
/// Construction does no I/O; the claim is taken by [`acquire`](Self::acquire)
/// and given back by [`release`](Self::release), or on drop if this handle
/// became the first instance.
///
/// ```no_run
/// use sys_single_instance::InstanceLock;
///
/// let mut lock = InstanceLock::new("my-app")
///     .on_second_instance(|args| println!("started again with {:?}", args));
/// if !lock.acquire()?.is_first() {
///     return Ok(());
/// }
/// // ... run ...
/// lock.release()?;
/// # Ok::<(), sys_single_instance::Error>(())
/// ```
pub struct InstanceLock {
    app_id: String,
    location: Location,
    signal: WakeSignal,
    timing: Timing,
    args: Option<Vec<String>>,
    callback: Option<SharedCallback>,
    pid: u32,
    first_pid: Option<u32>,
    owned: bool,
    listener: Option<Listener>,
}

impl InstanceLock {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            location: Location::default(),
            signal: WakeSignal::default(),
            timing: Timing::default(),
            args: None,
            callback: None,
            pid: std::process::id(),
            first_pid: None,
            owned: false,
            listener: None,
        }
    }

    pub fn location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// Signal used to wake the first instance. Must not be one the host
    /// relies on for anything else.
    pub fn signal(mut self, signal: WakeSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Arguments handed to the first instance. Defaults to this process's
    /// arguments without the program name.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Enables the handoff channel.
    ///
    /// As first instance, `callback` runs on a background thread with the
    /// arguments of every later invocation. As a second instance, the
    /// arguments are published to the first before `acquire` returns.
    ///
    /// A first instance without a callback still answers the wake signal:
    /// it consumes and drops whatever a second instance publishes.
    pub fn on_second_instance<F>(mut self, callback: F) -> Self
    where
        F: FnMut(Vec<String>) + Send + 'static,
    {
        let callback: Callback = Box::new(callback);
        self.callback = Some(Arc::new(Mutex::new(callback)));
        self
    }

    pub fn paths(&self) -> ClaimPaths {
        ClaimPaths::resolve(&self.app_id, &self.location)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// First instance seen by the last `acquire`, cleared by a successful `release`.
    pub fn first_pid(&self) -> Option<u32> {
        self.first_pid
    }

    pub fn is_first(&self) -> bool {
        self.owned
    }

    pub fn acquire(&mut self) -> Result<Ownership> {
        let paths = self.paths();

        let signals = match self.listener {
            None => Some(listener::register(self.signal).map_err(Error::Listener)?),
            Some(_) => None,
        };

        let owner = self.claim(&paths)?;
        self.first_pid = Some(owner);

        if owner == self.pid {
            self.owned = true;
            if let Some(signals) = signals {
                match Listener::spawn(signals, paths.args.clone(), self.callback.clone()) {
                    Ok(listener) => self.listener = Some(listener),
                    Err(e) => {
                        let _ = remove_if_present(&paths.pid);
                        self.owned = false;
                        self.first_pid = None;
                        return Err(Error::Listener(e));
                    }
                }
            }
            debug!("pid {} is first instance of {}", owner, self.app_id);
            return Ok(Ownership::First { pid: owner });
        }

        drop(signals);
        debug!("{} already running as pid {}", self.app_id, owner);

        let handoff = if self.callback.is_some() {
            handoff::publish(
                &paths,
                self.pid,
                owner,
                &self.handoff_args(),
                self.signal,
                &self.timing,
            )
        } else {
            HandoffStatus::Disabled
        };
        Ok(Ownership::Secondary {
            pid: owner,
            handoff,
        })
    }

    /// Gives the claim back if the identity file still names this process.
    ///
    /// A missing file or a foreign pid makes this a no-op, so a superseded
    /// instance never deletes its successor's claim.
    pub fn release(&mut self) -> Result<()> {
        let paths = self.paths();

        if let Some(listener) = self.listener.take() {
            listener.stop();
        }
        self.owned = false;

        match read_owner(&paths.pid).at(&paths.pid)? {
            Recorded::Pid(pid) if pid == self.pid => {}
            recorded => {
                debug!("not releasing {}: recorded {:?}", paths.pid.display(), recorded);
                return Ok(());
            }
        }

        remove_if_present(&paths.pid).at(&paths.pid)?;
        if self.callback.is_some() {
            remove_if_present(&paths.args_lock).at(&paths.args_lock)?;
            remove_if_present(&paths.args).at(&paths.args)?;
        }
        self.first_pid = None;
        debug!("released {}", paths.pid.display());
        Ok(())
    }

    /// Returns the pid of the live owner, which is `self.pid` when the
    /// exclusive create succeeded.
    fn claim(&self, paths: &ClaimPaths) -> Result<u32> {
        let mut retries = 0;
        loop {
            if create_exclusive(&paths.pid, self.pid).at(&paths.pid)? {
                return Ok(self.pid);
            }

            let recorded = read_owner(&paths.pid).at(&paths.pid)?;
            if let Recorded::Pid(pid) = recorded {
                if pid == self.pid || liveness::is_alive(pid) {
                    return Ok(pid);
                }
            }

            if retries == self.timing.reclaim_attempts {
                return Err(Error::Contended {
                    path: paths.pid.clone(),
                    attempts: retries,
                });
            }
            retries += 1;

            if recorded != Recorded::Absent {
                info!("reclaiming stale claim {} ({:?})", paths.pid.display(), recorded);
                if !retire_stale(&paths.pid, self.pid, &recorded).at(&paths.pid)? {
                    debug!("{} changed while reclaiming, retrying", paths.pid.display());
                }
            }
        }
    }

    fn handoff_args(&self) -> Vec<String> {
        match &self.args {
            Some(args) => args.clone(),
            None => std::env::args_os()
                .skip(1)
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect(),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = self.release() {
                warn!("failed to release {}: {}", self.app_id, e);
            }
        }
    }
}

/// Publishes `pid` at `path` only if nothing is there yet.
///
/// The content goes to a scratch file that is hard-linked into place, so the
/// identity file never exists without its pid.
fn create_exclusive(path: &Path, pid: u32) -> io::Result<bool> {
    let tmp = scratch(path, pid);
    fs::write(&tmp, pid.to_string())?;
    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Moves the identity file aside and deletes it only if it still holds
/// `stale`. Returns false when it already held something else, after putting
/// that content back.
///
/// Two reclaimers that read the same dead pid cannot both delete: the
/// second one's rename picks up the first one's fresh claim, sees the
/// mismatch and restores it. A window remains between that rename and the
/// restore, in which a third process finds no file and creates its own claim;
/// the restore then fails and the displaced claimer is not told.
fn retire_stale(path: &Path, pid: u32, stale: &Recorded) -> io::Result<bool> {
    let aside = scratch(&with_suffix(path, ".stale"), pid);
    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    }

    let moved = read_owner(&aside);
    let retired = matches!(&moved, Ok(recorded) if recorded == stale);
    let restored = match retired {
        true => Ok(()),
        false => match fs::hard_link(&aside, path) {
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!("{} was claimed again while being restored", path.display());
                Ok(())
            }
            linked => linked,
        },
    };
    let _ = fs::remove_file(&aside);
    restored?;
    moved.map(|_| retired)
}

fn read_owner(path: &Path) -> io::Result<Recorded> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Recorded::Absent),
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            return Ok(Recorded::Malformed("<non-utf8>".into()))
        }
        Err(e) => return Err(e),
    };
    Ok(match contents.trim().parse() {
        Ok(pid) => Recorded::Pid(pid),
        Err(_) => Recorded::Malformed(contents),
    })
}
