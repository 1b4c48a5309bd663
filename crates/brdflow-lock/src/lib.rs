//! Advisory file locking for brdflow runs
//!
//! One orchestrator process drives a given `run_id` at a time. The lock lives in
//! the run directory as `.lock` and records the owning PID so a crashed process
//! can be detected and its lock reclaimed. The locking is advisory and coordinates
//! brdflow processes but is not a security boundary.

use camino::{Utf8Path, Utf8PathBuf};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::process;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default age threshold for considering a lock stale (in seconds)
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 3600;

const LOCK_FILE_NAME: &str = ".lock";

/// Lock information stored in the lock file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Process ID that created the lock
    pub pid: u32,
    /// Timestamp when the lock was created (seconds since UNIX epoch)
    pub created_at: u64,
    /// Run being locked
    pub run_id: String,
    /// brdflow version that created the lock
    pub brdflow_version: String,
}

/// Lock errors for run locking operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Run '{run_id}' is already being driven by PID {pid} (locked {created_ago} ago)")]
    ConcurrentExecution {
        run_id: String,
        pid: u32,
        created_ago: String,
    },

    #[error("Stale lock detected for run '{run_id}' (PID {pid}, age {age_secs}s). Use --force to override")]
    StaleLock {
        run_id: String,
        pid: u32,
        age_secs: u64,
    },

    #[error("Lock file is corrupted or invalid: {reason}")]
    CorruptedLock { reason: String },

    #[error("Failed to acquire lock: {reason}")]
    AcquisitionFailed { reason: String },

    #[error("Failed to release lock: {reason}")]
    ReleaseFailed { reason: String },

    #[error("IO error during lock operation: {0}")]
    Io(#[from] io::Error),
}

/// Exclusive lock over one run directory
pub struct FileLock {
    lock_path: Utf8PathBuf,
    _fd_lock: Option<Box<RwLock<fs::File>>>,
    lock_info: LockInfo,
}

impl FileLock {
    /// Acquire the lock for `run_id` inside `run_dir`.
    ///
    /// Uses `create_new` so two processes can never both believe they created the
    /// lock. An existing lock is only taken over when its owner is gone and either
    /// `force` is set or the lock is older than the TTL.
    pub fn acquire(
        run_dir: &Utf8Path,
        run_id: &str,
        force: bool,
        ttl_seconds: Option<u64>,
    ) -> Result<Self, LockError> {
        match fs::create_dir_all(run_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(LockError::AcquisitionFailed {
                    reason: format!("Failed to create run directory {run_dir}: {e}"),
                });
            }
        }

        let lock_path = Self::lock_path(run_dir);
        let ttl = ttl_seconds.unwrap_or(DEFAULT_STALE_THRESHOLD_SECS);

        for attempt in 0..3u32 {
            let lock_info = LockInfo {
                pid: process::id(),
                created_at: now_secs(),
                run_id: run_id.to_string(),
                brdflow_version: env!("CARGO_PKG_VERSION").to_string(),
            };

            match fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&lock_path)
            {
                Ok(file) => return Self::finalize(lock_path, file, lock_info),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    Self::check_existing(&lock_path, run_id, force, ttl)?;
                    Self::remove_stale(&lock_path, run_id)?;
                    // Another process may win the race after removal; back off briefly.
                    std::thread::sleep(Duration::from_millis(10u64 << attempt));
                }
                Err(e) => {
                    return Err(LockError::AcquisitionFailed {
                        reason: format!("Failed to create lock file {lock_path}: {e}"),
                    });
                }
            }
        }

        Err(LockError::AcquisitionFailed {
            reason: format!("Another process acquired the lock for run '{run_id}' first"),
        })
    }

    fn finalize(
        lock_path: Utf8PathBuf,
        file: fs::File,
        lock_info: LockInfo,
    ) -> Result<Self, LockError> {
        let lock_json =
            serde_json::to_string_pretty(&lock_info).map_err(|e| LockError::AcquisitionFailed {
                reason: format!("Failed to serialize lock info for run '{}': {e}", lock_info.run_id),
            })?;

        let mut rw_lock = Box::new(RwLock::new(file));
        {
            let guard = rw_lock
                .try_write()
                .map_err(|_| LockError::ConcurrentExecution {
                    run_id: lock_info.run_id.clone(),
                    pid: 0,
                    created_ago: "unknown".to_string(),
                })?;

            let mut file_ref = &*guard;
            file_ref
                .write_all(lock_json.as_bytes())
                .and_then(|()| file_ref.flush())
                .and_then(|()| file_ref.sync_all())
                .map_err(|e| LockError::AcquisitionFailed {
                    reason: format!("Failed to write lock info for run '{}': {e}", lock_info.run_id),
                })?;
        }

        Ok(Self {
            lock_path,
            _fd_lock: Some(rw_lock),
            lock_info,
        })
    }

    /// Rename-then-delete keeps the window where no lock file exists small.
    fn remove_stale(lock_path: &Utf8Path, run_id: &str) -> Result<(), LockError> {
        let stale_path = lock_path.with_extension(format!(
            "stale.{}.{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default(),
            process::id()
        ));

        match fs::rename(lock_path, &stale_path) {
            Ok(()) => {
                let _ = fs::remove_file(&stale_path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::AcquisitionFailed {
                reason: format!("Failed to rename stale lock for run '{run_id}': {e}"),
            }),
        }
    }

    fn check_existing(
        lock_path: &Utf8Path,
        run_id: &str,
        force: bool,
        ttl_seconds: u64,
    ) -> Result<(), LockError> {
        let content = match fs::read_to_string(lock_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(LockError::CorruptedLock {
                    reason: format!("Failed to read existing lock for run '{run_id}': {e}"),
                });
            }
        };

        let existing: LockInfo = serde_json::from_str(&content).map_err(|e| {
            LockError::CorruptedLock {
                reason: format!("Failed to parse existing lock for run '{run_id}': {e}"),
            }
        })?;

        let age = now_secs().saturating_sub(existing.created_at);

        if is_process_running(existing.pid) {
            if force {
                return Ok(());
            }
            return Err(LockError::ConcurrentExecution {
                run_id: run_id.to_string(),
                pid: existing.pid,
                created_ago: format_age(age),
            });
        }

        if force || age > ttl_seconds {
            return Ok(());
        }

        Err(LockError::StaleLock {
            run_id: run_id.to_string(),
            pid: existing.pid,
            age_secs: age,
        })
    }

    /// Read the lock information for a run directory, if a lock exists
    pub fn get_lock_info(run_dir: &Utf8Path) -> Result<Option<LockInfo>, LockError> {
        let lock_path = Self::lock_path(run_dir);
        let content = match fs::read_to_string(&lock_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LockError::CorruptedLock {
                    reason: format!("Failed to read lock file: {e}"),
                });
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| LockError::CorruptedLock {
                reason: format!("Failed to parse lock file: {e}"),
            })
    }

    /// Whether a live process currently holds the lock for this run directory
    pub fn is_held(run_dir: &Utf8Path) -> Result<bool, LockError> {
        Ok(Self::get_lock_info(run_dir)?.is_some_and(|info| is_process_running(info.pid)))
    }

    /// Release the lock (also happens on drop)
    pub fn release(mut self) -> Result<(), LockError> {
        self._fd_lock.take();
        match fs::remove_file(&self.lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::ReleaseFailed {
                reason: format!("Failed to remove lock file: {e}"),
            }),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.lock_info.run_id
    }

    #[must_use]
    pub const fn lock_info(&self) -> &LockInfo {
        &self.lock_info
    }

    fn lock_path(run_dir: &Utf8Path) -> Utf8PathBuf {
        run_dir.join(LOCK_FILE_NAME)
    }
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock")
            .field("lock_path", &self.lock_path)
            .field("lock_info", &self.lock_info)
            .field("_fd_lock", &"<RwLock>")
            .finish()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self._fd_lock.take();
        let _ = fs::remove_file(&self.lock_path);
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn format_age(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}

fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // kill(pid, 0) probes existence; EPERM still means the process exists.
        let rc = unsafe { libc::kill(pid as i32, 0) };
        if rc == 0 {
            true
        } else {
            matches!(
                io::Error::last_os_error().raw_os_error(),
                Some(code) if code == libc::EPERM
            )
        }
    }

    #[cfg(windows)]
    {
        use winapi::um::handleapi::CloseHandle;
        use winapi::um::minwinbase::STILL_ACTIVE;
        use winapi::um::processthreadsapi::{GetExitCodeProcess, OpenProcess};
        use winapi::um::winnt::PROCESS_QUERY_LIMITED_INFORMATION;

        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                return false;
            }
            let mut exit_code: u32 = 0;
            let ok = GetExitCodeProcess(handle, &mut exit_code);
            CloseHandle(handle);
            ok != 0 && exit_code == STILL_ACTIVE
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        true
    }
}

/// Test helper: a temporary run directory that outlives the returned path
#[cfg(any(test, feature = "test-utils"))]
#[must_use]
pub fn temp_run_dir() -> (tempfile::TempDir, Utf8PathBuf) {
    let td = tempfile::TempDir::new().expect("create temp run dir");
    let path = Utf8PathBuf::from_path_buf(td.path().join("run")).expect("utf-8 temp path");
    (td, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_acquisition_and_release() {
        let (_td, run_dir) = temp_run_dir();

        let lock = FileLock::acquire(&run_dir, "run-acquire", false, None).unwrap();
        assert_eq!(lock.run_id(), "run-acquire");
        assert!(run_dir.join(".lock").exists());
        assert!(FileLock::is_held(&run_dir).unwrap());

        let second = FileLock::acquire(&run_dir, "run-acquire", false, None);
        assert!(matches!(
            second.unwrap_err(),
            LockError::ConcurrentExecution { .. }
        ));

        lock.release().unwrap();
        assert!(!run_dir.join(".lock").exists());

        let _again = FileLock::acquire(&run_dir, "run-acquire", false, None).unwrap();
    }

    #[test]
    fn test_lock_info_roundtrips_through_disk() {
        let (_td, run_dir) = temp_run_dir();
        let _lock = FileLock::acquire(&run_dir, "run-info", false, None).unwrap();

        let info = FileLock::get_lock_info(&run_dir).unwrap().unwrap();
        assert_eq!(info.run_id, "run-info");
        assert_eq!(info.pid, process::id());
        assert!(!info.brdflow_version.is_empty());
    }

    #[test]
    fn test_drop_removes_lock_file() {
        let (_td, run_dir) = temp_run_dir();
        {
            let _lock = FileLock::acquire(&run_dir, "run-drop", false, None).unwrap();
            assert!(run_dir.join(".lock").exists());
        }
        assert!(!run_dir.join(".lock").exists());
        assert!(FileLock::get_lock_info(&run_dir).unwrap().is_none());
    }

    fn write_foreign_lock(run_dir: &Utf8Path, created_at: u64) {
        fs::create_dir_all(run_dir).unwrap();
        let info = LockInfo {
            pid: 999_999,
            created_at,
            run_id: "run-foreign".to_string(),
            brdflow_version: "0.9.0".to_string(),
        };
        fs::write(
            run_dir.join(".lock"),
            serde_json::to_string_pretty(&info).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_dead_owner_recent_lock_requires_force() {
        let (_td, run_dir) = temp_run_dir();
        write_foreign_lock(&run_dir, now_secs());

        let err = FileLock::acquire(&run_dir, "run-foreign", false, None).unwrap_err();
        assert!(matches!(err, LockError::StaleLock { .. }));

        let lock = FileLock::acquire(&run_dir, "run-foreign", true, None).unwrap();
        assert_eq!(lock.lock_info().pid, process::id());
    }

    #[test]
    fn test_dead_owner_expired_lock_is_reclaimed() {
        let (_td, run_dir) = temp_run_dir();
        write_foreign_lock(&run_dir, 0);

        let lock = FileLock::acquire(&run_dir, "run-foreign", false, Some(60)).unwrap();
        assert_eq!(lock.run_id(), "run-foreign");
    }

    #[test]
    fn test_corrupted_lock_is_reported() {
        let (_td, run_dir) = temp_run_dir();
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(run_dir.join(".lock"), "{not json").unwrap();

        let err = FileLock::acquire(&run_dir, "run-corrupt", false, None).unwrap_err();
        assert!(matches!(err, LockError::CorruptedLock { .. }));
    }

    #[test]
    fn test_format_age_units() {
        assert_eq!(format_age(5), "5s");
        assert_eq!(format_age(120), "2m");
        assert_eq!(format_age(7200), "2h");
        assert_eq!(format_age(172_800), "2d");
    }
}
