use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// PID lockfile guaranteeing at most one engine process per data directory.
/// The lock is released on drop; locks left behind by dead processes are
/// reclaimed.
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    pub fn acquire(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("cannot create data dir {}", data_dir.display()))?;
        let path = data_dir.join("tidebot.pid");

        if let Ok(existing) = fs::read_to_string(&path) {
            let held_by: Option<u32> = existing.trim().parse().ok();
            match held_by {
                Some(pid) if process_alive(pid) => {
                    bail!(
                        "data directory {} is locked by live process {}",
                        data_dir.display(),
                        pid
                    );
                }
                Some(pid) => {
                    warn!("PidLock: reclaiming stale lock held by dead process {}", pid);
                }
                None => {
                    warn!("PidLock: reclaiming malformed lockfile {}", path.display());
                }
            }
        }

        fs::write(&path, std::process::id().to_string())
            .with_context(|| format!("cannot write lockfile {}", path.display()))?;
        info!("PidLock: acquired {}", path.display());
        Ok(Self { path })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("PidLock: failed to remove {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    // Without a cheap probe, be conservative and treat the lock as held.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_blocks_second_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = PidLock::acquire(dir.path()).unwrap();
        // Same (live) pid holds it.
        assert!(PidLock::acquire(dir.path()).is_err());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = PidLock::acquire(dir.path()).unwrap();
        }
        assert!(PidLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn stale_lock_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        // A pid that cannot be alive.
        fs::write(dir.path().join("tidebot.pid"), "999999999").unwrap();
        assert!(PidLock::acquire(dir.path()).is_ok());
    }
}
