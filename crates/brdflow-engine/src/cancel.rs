use camino::Utf8PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stop request for a run.
///
/// Set in-process (Ctrl-C) or by another process writing the run's cancel
/// marker. The orchestrator only looks at it at phase boundaries and while
/// waiting at a gate, so a tool call in progress always completes first.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    marker: Utf8PathBuf,
}

impl CancelToken {
    #[must_use]
    pub fn new(marker: Utf8PathBuf) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            marker,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.marker.exists()
    }

    /// Forget a previous request so a resumed run can proceed.
    pub fn clear(&self) -> std::io::Result<()> {
        self.flag.store(false, Ordering::SeqCst);
        match std::fs::remove_file(&self.marker) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flag_and_marker() {
        let tmp = TempDir::new().unwrap();
        let marker = Utf8PathBuf::from_path_buf(tmp.path().join("cancel")).unwrap();
        let token = CancelToken::new(marker.clone());
        assert!(!token.is_cancelled());

        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        token.clear().unwrap();
        assert!(!token.is_cancelled());

        std::fs::write(&marker, "").unwrap();
        assert!(token.is_cancelled());
        token.clear().unwrap();
        assert!(!marker.exists());
    }
}
