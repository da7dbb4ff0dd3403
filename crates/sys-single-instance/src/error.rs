use std::io;
use std::path::PathBuf;

/// Failures that stop `acquire` or `release` from establishing the claim.
///
/// Handoff problems are not errors; they are reported through
/// [`HandoffStatus`](crate::HandoffStatus).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot establish claim at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("claim at {} still stale after {attempts} reclaim attempts", path.display())]
    Contended { path: PathBuf, attempts: u32 },

    #[error("cannot start handoff listener")]
    Listener(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
