//! Per-run temporary directory for chunk files
//!
//! Every sort invocation owns one `kmerset.tmp.run_*` directory under the
//! configured root, created through [`tempfile`] so two runs never share it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::{KmerSetError, Result};

const RUN_PREFIX: &str = "kmerset.tmp.run_";

/// Exclusively owned temp directory; removed on drop unless kept
pub struct TempWorkspace {
    dir: Option<TempDir>,
    path: PathBuf,
    next_chunk: AtomicU64,
    keep: bool,
}

impl TempWorkspace {
    /// Create a fresh run directory under `root`
    pub fn create(root: &Path, keep: bool) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| KmerSetError::io(root, "create temp root", e))?;
        let dir = tempfile::Builder::new()
            .prefix(RUN_PREFIX)
            .tempdir_in(root)
            .map_err(|e| KmerSetError::io(root, "create temp directory", e))?;
        let path = dir.path().to_path_buf();
        debug!("Created temp directory {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
            next_chunk: AtomicU64::new(0),
            keep,
        })
    }

    /// The run directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the directory survives the run
    pub fn keeps_files(&self) -> bool {
        self.keep
    }

    /// Path for the next chunk file; unique within the run
    pub fn next_chunk_path(&self) -> PathBuf {
        let id = self.next_chunk.fetch_add(1, Ordering::Relaxed);
        self.path.join(format!("chunk_{id:06}.kms"))
    }

    /// Number of chunk paths handed out
    pub fn chunks_allocated(&self) -> u64 {
        self.next_chunk.load(Ordering::Relaxed)
    }

    /// Remove the directory, or release it when kept; returns the number of
    /// failures (0 or 1)
    ///
    /// Failures are logged and never turned into errors.
    pub fn cleanup(&mut self) -> usize {
        let Some(dir) = self.dir.take() else {
            return 0;
        };
        if self.keep {
            let kept = dir.keep();
            info!("Keeping temp directory {}", kept.display());
            return 0;
        }
        match dir.close() {
            Ok(()) => 0,
            Err(e) => {
                warn!("Failed to remove temp directory {}: {}", self.path.display(), e);
                1
            }
        }
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        if self.keep {
            if let Some(dir) = self.dir.take() {
                let _ = dir.keep();
            }
        }
    }
}
