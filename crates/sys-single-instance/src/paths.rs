//! Where the claim files live.
//!
//! Every process sharing an application id must compute the same three
//! paths, so resolution is a pure function of the id and the [`Location`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Directory that holds the claim files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Location {
    /// `std::env::temp_dir()`, honouring `TMPDIR`.
    #[default]
    Temp,
    /// Per-user runtime dir (`XDG_RUNTIME_DIR`), else the cache dir, else temp.
    Runtime,
    /// An explicit directory.
    Dir(PathBuf),
}

impl Location {
    pub fn dir(&self) -> PathBuf {
        match self {
            Location::Temp => std::env::temp_dir(),
            Location::Runtime => dirs::runtime_dir()
                .or_else(dirs::cache_dir)
                .unwrap_or_else(std::env::temp_dir),
            Location::Dir(dir) => dir.clone(),
        }
    }
}

/// The identity file and the two handoff files derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimPaths {
    /// `<dir>/<id>.pid`, holds the decimal pid of the owner.
    pub pid: PathBuf,
    /// `<dir>/<id>.pid.args`, the pending handoff payload.
    pub args: PathBuf,
    /// `<dir>/<id>.pid.args.lock`, zero-length writer lock.
    pub args_lock: PathBuf,
}

impl ClaimPaths {
    pub fn resolve(app_id: &str, location: &Location) -> Self {
        let pid = location.dir().join(format!("{}.pid", app_id));
        let args = with_suffix(&pid, ".args");
        let args_lock = with_suffix(&args, ".lock");
        Self {
            pid,
            args,
            args_lock,
        }
    }
}

/// Appends `suffix` to the final component (`a.pid` -> `a.pid.args`).
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Per-writer scratch file next to `path`, renamed or linked into place once complete.
pub(crate) fn scratch(path: &Path, pid: u32) -> PathBuf {
    with_suffix(path, &format!(".{}.tmp", pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_derive_from_id() {
        let paths = ClaimPaths::resolve("demo-app", &Location::Dir("/run/x".into()));
        assert_eq!(paths.pid, PathBuf::from("/run/x/demo-app.pid"));
        assert_eq!(paths.args, PathBuf::from("/run/x/demo-app.pid.args"));
        assert_eq!(paths.args_lock, PathBuf::from("/run/x/demo-app.pid.args.lock"));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let a = ClaimPaths::resolve("same", &Location::Temp);
        let b = ClaimPaths::resolve("same", &Location::Temp);
        assert_eq!(a, b);
        assert!(a.pid.starts_with(std::env::temp_dir()));
    }

    #[test]
    fn test_runtime_location_falls_back_to_cache_then_temp() {
        let expected = dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .unwrap_or_else(std::env::temp_dir);
        assert_eq!(Location::Runtime.dir(), expected);

        let paths = ClaimPaths::resolve("rt-app", &Location::Runtime);
        assert_eq!(paths.pid, expected.join("rt-app.pid"));
    }

    #[test]
    fn test_scratch_is_per_writer() {
        let p = Path::new("/tmp/app.pid");
        assert_eq!(scratch(p, 42), PathBuf::from("/tmp/app.pid.42.tmp"));
        assert_ne!(scratch(p, 42), scratch(p, 43));
    }
}
