//! Exclusive advisory lock on `server.lock`.
//!
//! Held for the lifetime of a supervisor instance so two embedder processes
//! never supervise the same sidecar. Dropping the guard releases the lock;
//! on Unix the OS also releases it if the process dies, so a crashed
//! embedder never wedges the next one.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;

use tracing::debug;

#[cfg(unix)]
use nix::fcntl::{Flock, FlockArg};

/// Guard owning the advisory lock.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    #[cfg(unix)]
    _lock: Flock<std::fs::File>,
    #[cfg(not(unix))]
    _file: std::fs::File,
}

impl LockFile {
    /// Try to take the lock without blocking.
    ///
    /// Returns an error when another live supervisor holds it or the lock
    /// file cannot be created.
    pub fn acquire(path: PathBuf) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        #[cfg(unix)]
        {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            let lock = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
                io::Error::new(
                    io::ErrorKind::WouldBlock,
                    format!("lock {} held elsewhere: {}", path.display(), errno),
                )
            })?;
            debug!(path = %path.display(), "acquired server lock");
            Ok(Self { path, _lock: lock })
        }

        #[cfg(not(unix))]
        {
            // No flock available: exclusive creation is the best-effort
            // equivalent. The guard deletes the file on drop.
            let file = OpenOptions::new().create_new(true).write(true).open(&path)?;
            debug!(path = %path.display(), "acquired server lock");
            Ok(Self { path, _file: file })
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        // The flock is released when the file closes; removing the file is
        // cosmetic but keeps the data dir tidy.
        let _ = fs::remove_file(&self.path);
        debug!(path = %self.path.display(), "released server lock");
    }
}
