//! K-mer extraction from FASTA/FASTQ files
//!
//! Reading is delegated to `needletail`, which also handles gzip-compressed
//! input transparently. Windows spanning a non-ACGT base are skipped.

use std::path::Path;

use needletail::parse_fastx_file;
use tracing::debug;

use crate::error::{KmerSetError, Result};
use crate::kmer::KmerScanner;
use crate::record::Record;

/// Totals from one scanned file
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    /// Sequence records read
    pub sequences: u64,
    /// Bases read
    pub bases: u64,
    /// K-mer records produced
    pub kmers: u64,
}

/// Call `f` for every k-mer of every sequence in a FASTA/FASTQ file
///
/// Each record carries `taxid` (0 for none). With `canonical` set the codes
/// are canonical k-mers.
///
/// # Errors
/// Unreadable or malformed files give [`KmerSetError::Sequence`]; errors
/// returned by `f` stop the scan and are passed through.
pub fn scan_fastx<P, F>(path: P, k: usize, canonical: bool, taxid: u32, mut f: F) -> Result<ScanSummary>
where
    P: AsRef<Path>,
    F: FnMut(Record) -> Result<()>,
{
    let path = path.as_ref();
    crate::encoding::check_k(k)?;
    let mut reader = parse_fastx_file(path).map_err(|e| KmerSetError::Sequence {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut summary = ScanSummary::default();
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| KmerSetError::Sequence {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let seq = record.seq();
        summary.sequences += 1;
        summary.bases += seq.len() as u64;
        for code in KmerScanner::new(&seq, k, canonical)? {
            f(Record::new(code, taxid))?;
            summary.kmers += 1;
        }
    }

    debug!(
        "Scanned {}: {} sequences, {} bases, {} k-mers",
        path.display(),
        summary.sequences,
        summary.bases,
        summary.kmers
    );
    Ok(summary)
}
