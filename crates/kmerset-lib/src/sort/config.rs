//! Sort configuration
//!
//! Resource limits and output policy for one external sort invocation.

use std::path::PathBuf;

use crate::constants::{DEFAULT_CHUNK_ELEMENTS, DEFAULT_MAX_OPEN_FILES, MIB, RECORD_SIZE_BYTES};
use crate::error::{KmerSetError, Result};
use crate::sort::policy::OutputPolicy;

/// Configuration parameters for an external sort
#[derive(Debug, Clone)]
pub struct SortConfiguration {
    /// Records per in-memory chunk (0 = sort everything in memory)
    pub chunk_elements: usize,

    /// Split-phase workers and sort threads (0 = all available cores)
    pub num_threads: usize,

    /// Maximum number of chunk files merged at once (at least 2)
    pub max_open_files: usize,

    /// What to emit per code
    pub policy: OutputPolicy,

    /// Root under which the per-run temp directory is created
    pub tmp_dir: PathBuf,

    /// Keep the temp directory after the run
    pub keep_temp: bool,

    /// Write outputs with compact code widths
    pub compact: bool,

    /// Accept inputs that disagree on taxid presence
    pub mixed_taxid: bool,
}

impl Default for SortConfiguration {
    fn default() -> Self {
        Self {
            chunk_elements: DEFAULT_CHUNK_ELEMENTS,
            num_threads: 0,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            policy: OutputPolicy::All,
            tmp_dir: std::env::temp_dir(),
            keep_temp: false,
            compact: true,
            mixed_taxid: false,
        }
    }
}

impl SortConfiguration {
    /// Default configuration with a memory budget given in MiB
    pub fn from_chunk_mib(mib: usize) -> Self {
        Self {
            chunk_elements: Self::chunk_elements_for_mib(mib),
            ..Self::default()
        }
    }

    /// Convert a per-chunk memory budget in MiB to a record count
    pub fn chunk_elements_for_mib(mib: usize) -> usize {
        mib.saturating_mul(MIB) / RECORD_SIZE_BYTES
    }

    /// Builder-style setter for the output policy
    pub fn with_policy(mut self, policy: OutputPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builder-style setter for the temp root
    pub fn with_tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = tmp_dir.into();
        self
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.max_open_files < 2 {
            return Err(KmerSetError::InvalidConfiguration(format!(
                "max_open_files must be at least 2, got {}",
                self.max_open_files
            )));
        }
        Ok(())
    }

    /// Worker count with 0 resolved to the available parallelism
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.num_threads
        }
    }

    /// Log configuration parameters via tracing
    pub fn print(&self) {
        tracing::info!("Sort Configuration:");
        if self.chunk_elements == 0 {
            tracing::info!("  chunk_elements = unbounded (in-memory)");
        } else {
            tracing::info!(
                "  chunk_elements = {} (~{} MiB)",
                self.chunk_elements,
                self.chunk_elements * RECORD_SIZE_BYTES / MIB
            );
        }
        if self.num_threads == 0 {
            tracing::info!("  num_threads = all available cores");
        } else {
            tracing::info!("  num_threads = {}", self.num_threads);
        }
        tracing::info!("  policy = {}", self.policy);
        tracing::debug!("  max_open_files = {}", self.max_open_files);
        tracing::debug!("  tmp_dir = {:?}", self.tmp_dir);
        tracing::debug!("  keep_temp = {}", self.keep_temp);
        tracing::debug!("  compact = {}", self.compact);
        tracing::debug!("  mixed_taxid = {}", self.mixed_taxid);
    }
}
