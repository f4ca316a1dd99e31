use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use super::{ManifestError, ManifestResult};

const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Advisory lock guard. The lock is released when the guard is dropped.
pub struct ManifestLock {
    resource: String,
    release: Option<Box<dyn FnOnce()>>,
}

impl ManifestLock {
    pub fn new(resource: impl Into<String>, release: impl FnOnce() + 'static) -> Self {
        Self {
            resource: resource.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl fmt::Debug for ManifestLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestLock")
            .field("resource", &self.resource)
            .finish()
    }
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Lock file created with `create_new`. The holder's pid is written into it.
///
/// A lock whose holder is no longer running, or that is older than the
/// stale bound, was left by an interrupted run and is taken over.
pub(crate) struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub(crate) fn acquire(
        path: &Path,
        timeout: Duration,
        stale_after: Duration,
    ) -> ManifestResult<Self> {
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if let Some(holder) = stale_holder(path, stale_after) {
                        warn!(path = %path.display(), %holder, "reclaiming stale manifest lock");
                        match fs::remove_file(path) {
                            Ok(()) => continue,
                            // Another run reclaimed it first.
                            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                            Err(source) => {
                                return Err(ManifestError::Io {
                                    path: path.to_path_buf(),
                                    source,
                                })
                            }
                        }
                    }
                    if Instant::now() >= deadline {
                        return Err(ManifestError::Locked {
                            resource: path.display().to_string(),
                        });
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(source) => {
                    return Err(ManifestError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }
    }

    /// Hand the lock to a [`ManifestLock`] guard.
    pub(crate) fn into_guard(self) -> ManifestLock {
        let resource = self.path.display().to_string();
        ManifestLock::new(resource, move || drop(self))
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Describes the holder of `path` if the lock is stale, `None` while it is live.
fn stale_holder(path: &Path, stale_after: Duration) -> Option<String> {
    let pid = fs::read_to_string(path)
        .ok()
        .and_then(|content| content.trim().parse::<u32>().ok());
    if let Some(pid) = pid.filter(|pid| !process_alive(*pid)) {
        return Some(format!("exited pid {pid}"));
    }

    let age = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())?;
    (age >= stale_after).then(|| format!("held for {}s", age.as_secs()))
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// Without procfs only the age bound can expire a lock.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}
