//! One-shot transfer of a second instance's arguments to the owner.
//!
//! The publisher holds `<id>.pid.args.lock` for the whole exchange, drops the
//! payload into `<id>.pid.args`, signals the owner and waits for the payload
//! to vanish. The owner's listener deletes the payload before running user
//! code, so the disappearance is the acknowledgement.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use nix::sys::signal::kill;

use crate::config::{RetryPolicy, Timing};
use crate::liveness;
use crate::paths::{scratch, ClaimPaths};
use crate::signal::WakeSignal;

/// Separates arguments in the payload. `argv` entries are C strings, so they
/// never contain it.
pub const DELIMITER: u8 = b'\0';

/// What happened to a second instance's arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffStatus {
    /// No callback registered, nothing was sent.
    Disabled,
    /// The owner consumed the payload.
    Delivered,
    /// The owner was signalled but did not consume in time; the payload was withdrawn.
    Unconsumed,
    /// Another publisher held the lock for the whole retry budget.
    LockTimeout,
    /// I/O or signal delivery failed.
    Failed(String),
}

impl HandoffStatus {
    pub fn is_delivered(&self) -> bool {
        *self == HandoffStatus::Delivered
    }
}

/// Exclusive-create marker serializing publishers. Removed on drop.
#[derive(Debug)]
pub struct HandoffLock {
    path: PathBuf,
}

impl HandoffLock {
    /// Returns `Ok(None)` when the lock stayed taken for the whole policy.
    pub fn acquire(path: &Path, policy: &RetryPolicy) -> io::Result<Option<Self>> {
        policy.poll(|| {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(_) => Ok(Some(Self {
                    path: path.to_path_buf(),
                })),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
                Err(e) => Err(e),
            }
        })
    }
}

impl Drop for HandoffLock {
    fn drop(&mut self) {
        if let Err(e) = remove_if_present(&self.path) {
            warn!("failed to remove handoff lock {}: {}", self.path.display(), e);
        }
    }
}

pub fn encode<S: AsRef<str>>(args: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push(DELIMITER);
        }
        out.extend_from_slice(arg.as_ref().as_bytes());
    }
    out
}

/// An empty payload is an empty argument list.
pub fn decode(raw: &[u8]) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(|b| *b == DELIMITER)
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

/// Runs the publish protocol against the live owner `target`.
///
/// Never fails: every problem is logged and folded into the returned status.
pub(crate) fn publish(
    paths: &ClaimPaths,
    own_pid: u32,
    target: u32,
    args: &[String],
    signal: WakeSignal,
    timing: &Timing,
) -> HandoffStatus {
    match try_publish(paths, own_pid, target, args, signal, timing) {
        Ok(status) => status,
        Err(e) => {
            warn!("handoff to pid {} failed: {}", target, e);
            HandoffStatus::Failed(e.to_string())
        }
    }
}

fn try_publish(
    paths: &ClaimPaths,
    own_pid: u32,
    target: u32,
    args: &[String],
    signal: WakeSignal,
    timing: &Timing,
) -> io::Result<HandoffStatus> {
    if args.iter().any(|arg| arg.as_bytes().contains(&DELIMITER)) {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "argument contains a NUL byte",
        ));
    }
    let target_pid = liveness::target(target)
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "owner pid out of range"))?;

    let Some(_lock) = HandoffLock::acquire(&paths.args_lock, &timing.lock)? else {
        warn!(
            "handoff lock {} busy for {:?}, skipping handoff",
            paths.args_lock.display(),
            timing.lock.budget()
        );
        return Ok(HandoffStatus::LockTimeout);
    };

    write_atomic(&paths.args, own_pid, &encode(args))?;
    debug!("wrote {} handoff args, sending {} to {}", args.len(), signal, target);

    if let Err(errno) = kill(target_pid, signal.as_nix()) {
        let _ = remove_if_present(&paths.args);
        return Err(io::Error::from(errno));
    }

    let consumed = timing
        .consume
        .poll(|| Ok::<_, io::Error>((!paths.args.try_exists()?).then_some(())))?;
    if consumed.is_some() {
        return Ok(HandoffStatus::Delivered);
    }

    warn!(
        "pid {} did not consume handoff within {:?}",
        target,
        timing.consume.budget()
    );
    remove_if_present(&paths.args)?;
    Ok(HandoffStatus::Unconsumed)
}

/// Takes the pending payload, if any. The file is deleted before returning.
pub(crate) fn consume(path: &Path) -> io::Result<Option<Vec<String>>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    remove_if_present(path)?;
    Ok(Some(decode(&raw)))
}

/// Writes through a per-writer scratch file so readers never see a partial payload.
fn write_atomic(path: &Path, own_pid: u32, contents: &[u8]) -> io::Result<()> {
    let tmp = scratch(path, own_pid);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

pub(crate) fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::Location;
    use std::process::Command;
    use std::time::Duration;

    fn fast_timing() -> Timing {
        Timing {
            lock: RetryPolicy::new(3, Duration::from_millis(10)),
            consume: RetryPolicy::new(5, Duration::from_millis(10)),
            reclaim_attempts: 2,
        }
    }

    fn paths_in(dir: &tempfile::TempDir) -> ClaimPaths {
        ClaimPaths::resolve("handoff-test", &Location::Dir(dir.path().to_path_buf()))
    }

    #[test]
    fn test_decode_splits_on_delimiter() {
        let raw = encode(&["--foo", "bar baz", ""]);
        assert_eq!(raw, b"--foo\0bar baz\0");
        assert_eq!(decode(&raw), vec!["--foo", "bar baz", ""]);
    }

    #[test]
    fn test_empty_payload_is_no_args() {
        assert_eq!(encode::<&str>(&[]), b"");
        assert!(decode(b"").is_empty());
    }

    #[test]
    fn test_lock_is_exclusive_and_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.lock");
        let policy = RetryPolicy::new(2, Duration::from_millis(5));

        let held = HandoffLock::acquire(&path, &policy).unwrap().unwrap();
        assert!(path.exists());
        assert!(HandoffLock::acquire(&path, &policy).unwrap().is_none());

        drop(held);
        assert!(!path.exists());
        assert!(HandoffLock::acquire(&path, &policy).unwrap().is_some());
    }

    #[test]
    fn test_consume_takes_payload_once() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(&dir);
        assert_eq!(consume(&paths.args).unwrap(), None);

        write_atomic(&paths.args, 1, &encode(&["--foo", "bar"])).unwrap();
        assert_eq!(
            consume(&paths.args).unwrap(),
            Some(vec!["--foo".to_string(), "bar".to_string()])
        );
        assert!(!paths.args.exists());
        assert_eq!(consume(&paths.args).unwrap(), None);
    }

    #[test]
    fn test_publish_skips_when_lock_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(&dir);
        fs::write(&paths.args_lock, b"").unwrap();

        let status = publish(
            &paths,
            std::process::id(),
            std::process::id(),
            &["a".to_string()],
            WakeSignal::WindowChange,
            &fast_timing(),
        );
        assert_eq!(status, HandoffStatus::LockTimeout);
        assert!(paths.args_lock.exists(), "foreign lock must survive");
        assert!(!paths.args.exists());
    }

    #[test]
    fn test_unconsumed_payload_is_withdrawn() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(&dir);
        // SIGWINCH is ignored by default, so the child survives and never consumes.
        let mut owner = Command::new("sleep").arg("30").spawn().unwrap();

        let status = publish(
            &paths,
            std::process::id(),
            owner.id(),
            &["--foo".to_string()],
            WakeSignal::WindowChange,
            &fast_timing(),
        );
        owner.kill().unwrap();
        owner.wait().unwrap();

        assert_eq!(status, HandoffStatus::Unconsumed);
        assert!(!paths.args.exists());
        assert!(!paths.args_lock.exists());
    }

    #[test]
    fn test_nul_in_argument_fails_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(&dir);
        let status = publish(
            &paths,
            std::process::id(),
            std::process::id(),
            &["bad\0arg".to_string()],
            WakeSignal::WindowChange,
            &fast_timing(),
        );
        assert!(matches!(status, HandoffStatus::Failed(_)));
        assert!(!paths.args_lock.exists());
        assert!(!paths.args.exists());
    }
}
