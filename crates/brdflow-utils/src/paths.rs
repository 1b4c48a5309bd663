//! Run directory layout
//!
//! ```text
//! <BRDFLOW_HOME>/runs/<run_id>/
//!     .lock
//!     brd.md
//!     checkpoints/000001-auth.json ...
//!     artifacts/summary.md, trace.json, metrics.json, ...
//!     reply, cancel
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use std::cell::RefCell;

thread_local! {
    static THREAD_HOME: RefCell<Option<Utf8PathBuf>> = const { RefCell::new(None) };
}

/// Resolve brdflow home:
/// 1) thread-local override (tests use this)
/// 2) env `BRDFLOW_HOME`
/// 3) default ".brdflow"
#[must_use]
pub fn brdflow_home() -> Utf8PathBuf {
    if let Some(tl) = THREAD_HOME.with(|tl| tl.borrow().clone()) {
        return tl;
    }
    if let Ok(p) = std::env::var("BRDFLOW_HOME") {
        return Utf8PathBuf::from(p);
    }
    Utf8PathBuf::from(".brdflow")
}

/// Returns `<BRDFLOW_HOME>/runs/<run_id>`
#[must_use]
pub fn run_root(run_id: &str) -> Utf8PathBuf {
    brdflow_home().join("runs").join(run_id)
}

/// mkdir -p; treat `AlreadyExists` as success
pub fn ensure_dir_all<P: AsRef<std::path::Path>>(p: P) -> std::io::Result<()> {
    match std::fs::create_dir_all(&p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Resolved paths for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    root: Utf8PathBuf,
}

impl RunPaths {
    /// Paths under an explicit home directory.
    #[must_use]
    pub fn new(home: &Utf8Path, run_id: &str) -> Self {
        Self {
            root: home.join("runs").join(run_id),
        }
    }

    /// Paths under the resolved [`brdflow_home`].
    #[must_use]
    pub fn resolve(run_id: &str) -> Self {
        Self {
            root: run_root(run_id),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    #[must_use]
    pub fn checkpoints_dir(&self) -> Utf8PathBuf {
        self.root.join("checkpoints")
    }

    #[must_use]
    pub fn artifacts_dir(&self) -> Utf8PathBuf {
        self.root.join("artifacts")
    }

    #[must_use]
    pub fn artifact(&self, name: &str) -> Utf8PathBuf {
        self.artifacts_dir().join(name)
    }

    /// Copy of the BRD text taken at run start.
    #[must_use]
    pub fn brd_copy(&self) -> Utf8PathBuf {
        self.root.join("brd.md")
    }

    /// Drop-box for an out-of-band gate reply.
    #[must_use]
    pub fn reply_file(&self) -> Utf8PathBuf {
        self.root.join("reply")
    }

    /// Marker written by `brdflow cancel`.
    #[must_use]
    pub fn cancel_marker(&self) -> Utf8PathBuf {
        self.root.join("cancel")
    }

    pub fn ensure(&self) -> std::io::Result<()> {
        ensure_dir_all(self.checkpoints_dir())?;
        ensure_dir_all(self.artifacts_dir())
    }
}

/// RAII guard for isolated home that clears thread-local state on drop
#[cfg(any(test, feature = "test-utils"))]
pub struct HomeGuard {
    inner: tempfile::TempDir,
}

#[cfg(any(test, feature = "test-utils"))]
impl HomeGuard {
    #[must_use]
    pub fn home(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.inner.path().to_path_buf())
            .unwrap_or_else(|p| Utf8PathBuf::from(p.to_string_lossy().into_owned()))
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Drop for HomeGuard {
    fn drop(&mut self) {
        THREAD_HOME.with(|tl| *tl.borrow_mut() = None);
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl std::ops::Deref for HomeGuard {
    type Target = tempfile::TempDir;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Test helper: give this test a unique home under the system temp dir.
///
/// Hold the `HomeGuard` for the test's duration so the directory stays alive.
#[cfg(any(test, feature = "test-utils"))]
#[must_use]
#[allow(clippy::expect_used)]
pub fn with_isolated_home() -> HomeGuard {
    let td = tempfile::TempDir::new().expect("create temp home");
    let guard = HomeGuard { inner: td };
    let p = guard.home();
    THREAD_HOME.with(|tl| *tl.borrow_mut() = Some(p));
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolated_home_overrides_and_resets() {
        let home = {
            let guard = with_isolated_home();
            let home = brdflow_home();
            assert_eq!(home, guard.home());
            assert_eq!(run_root("r1"), home.join("runs").join("r1"));
            home
        };
        assert_ne!(brdflow_home(), home);
    }

    #[test]
    fn test_run_paths_layout() {
        let paths = RunPaths::new(Utf8Path::new("/tmp/h"), "run-7");
        assert_eq!(paths.root(), Utf8Path::new("/tmp/h/runs/run-7"));
        assert_eq!(paths.checkpoints_dir(), Utf8Path::new("/tmp/h/runs/run-7/checkpoints"));
        assert_eq!(
            paths.artifact("summary.md"),
            Utf8Path::new("/tmp/h/runs/run-7/artifacts/summary.md")
        );
        assert_eq!(paths.cancel_marker(), Utf8Path::new("/tmp/h/runs/run-7/cancel"));
    }

    #[test]
    fn test_ensure_creates_dirs_idempotently() {
        let guard = with_isolated_home();
        let paths = RunPaths::new(&guard.home(), "r2");
        paths.ensure().unwrap();
        paths.ensure().unwrap();
        assert!(paths.artifacts_dir().is_dir());
        assert!(paths.checkpoints_dir().is_dir());
    }
}
