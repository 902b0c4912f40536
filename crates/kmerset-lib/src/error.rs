//! Unified error type for the kmerset library.
//!
//! Library code returns [`KmerSetError`]; the CLI wraps it in `anyhow` for
//! reporting. Every file-level failure carries the path it happened on.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::encoding::EncodingError;

/// Error type for container, sort and set-algebra operations
#[derive(Error, Debug)]
pub enum KmerSetError {
    /// Bad magic number or an unreadable header
    #[error("Invalid container format in '{}': {detail}", .path.display())]
    InvalidFileFormat {
        /// Offending file
        path: PathBuf,
        /// What was wrong
        detail: String,
    },

    /// Container written by an incompatible format version
    #[error("Unsupported container version {major}.{minor} in '{}'", .path.display())]
    UnsupportedVersion {
        /// Offending file
        path: PathBuf,
        /// Major version found
        major: u64,
        /// Minor version found
        minor: u64,
    },

    /// Inputs of a multi-file operation disagree on their schema
    #[error("Incompatible input '{}': {reason}", .path.display())]
    IncompatibleInputs {
        /// Offending input
        path: PathBuf,
        /// Which property differs
        reason: String,
    },

    /// Taxid presence differs across inputs and mixed mode is off
    #[error("Taxid information in '{}' is inconsistent with the other inputs (mixed-taxid mode is disabled)", .path.display())]
    TaxidInconsistency {
        /// Offending input
        path: PathBuf,
    },

    /// I/O error with path context
    #[error("I/O error during {operation} on '{}': {source}", .path.display())]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// What was being done
        operation: &'static str,
        /// Underlying error
        source: io::Error,
    },

    /// Invalid base, code overflow or bad k
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// Malformed text input
    #[error("Parse error at line {line}: {message}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// What was wrong
        message: String,
    },

    /// A text entry that does not encode as a k-mer of the stream's length
    #[error("Invalid entry at line {line}: {source}")]
    InvalidEntry {
        /// 1-based line number
        line: usize,
        /// Codec failure
        #[source]
        source: EncodingError,
    },

    /// FASTA/FASTQ reader failure
    #[error("Failed to read sequences from '{}': {message}", .path.display())]
    Sequence {
        /// Sequence file
        path: PathBuf,
        /// Reader message
        message: String,
    },

    /// A taxid does not fit the container's declared maximum
    #[error("Taxid {taxid} exceeds the container maximum {max}")]
    TaxidOverflow {
        /// Offending taxid
        taxid: u32,
        /// Declared maximum
        max: u32,
    },

    /// The number of records disagrees with the declared count
    #[error("Record count mismatch in '{}': declared {declared}, found {actual}", .path.display())]
    RecordCountMismatch {
        /// File involved
        path: PathBuf,
        /// Count from the header or trailer
        declared: u64,
        /// Records actually written or read
        actual: u64,
    },

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A split-phase worker panicked
    #[error("Worker thread panicked while sorting a chunk")]
    WorkerPanicked,
}

impl KmerSetError {
    /// Wrap an I/O error with the path and operation it happened on
    pub fn io(path: impl AsRef<Path>, operation: &'static str, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            operation,
            source,
        }
    }
}

/// Result type for kmerset operations
pub type Result<T> = std::result::Result<T, KmerSetError>;
