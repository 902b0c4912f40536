//! Records and the source/sink seams every engine is written against

use std::path::Path;

use crate::error::{KmerSetError, Result};

/// One persisted entry: a code and its taxid (0 = unknown)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Record {
    /// K-mer code or hash value
    pub code: u64,
    /// Taxonomic ID, 0 when absent
    pub taxid: u32,
}

impl Record {
    /// Create a record with a taxid
    #[inline]
    pub const fn new(code: u64, taxid: u32) -> Self {
        Self { code, taxid }
    }

    /// Create a record without taxid information
    #[inline]
    pub const fn plain(code: u64) -> Self {
        Self { code, taxid: 0 }
    }
}

/// Schema of a record stream, independent of how it is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    /// K-mer length
    pub k: usize,
    /// Codes are canonical k-mers
    pub canonical: bool,
    /// Codes are non-decreasing
    pub sorted: bool,
    /// Codes are hashes rather than k-mer encodings
    pub hashed: bool,
    /// Records carry taxid information
    pub has_taxid: bool,
}

impl StreamInfo {
    /// Unsorted, non-canonical k-mer stream without taxids
    pub fn kmers(k: usize) -> Self {
        Self {
            k,
            canonical: false,
            sorted: false,
            hashed: false,
            has_taxid: false,
        }
    }
}

/// A sequential stream of records; `Ok(None)` marks the end
pub trait RecordSource {
    /// Read the next record
    fn next_record(&mut self) -> Result<Option<Record>>;

    /// Name used in error messages
    fn name(&self) -> &Path {
        Path::new("<stream>")
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn next_record(&mut self) -> Result<Option<Record>> {
        (**self).next_record()
    }

    fn name(&self) -> &Path {
        (**self).name()
    }
}

impl<S: RecordSource + ?Sized> RecordSource for &mut S {
    fn next_record(&mut self) -> Result<Option<Record>> {
        (**self).next_record()
    }

    fn name(&self) -> &Path {
        (**self).name()
    }
}

/// A consumer of records
pub trait RecordSink {
    /// Accept one record
    fn write_record(&mut self, record: Record) -> Result<()>;
}

impl RecordSink for Vec<Record> {
    fn write_record(&mut self, record: Record) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn write_record(&mut self, record: Record) -> Result<()> {
        (**self).write_record(record)
    }
}

/// In-memory record source
#[derive(Debug, Clone)]
pub struct MemorySource {
    records: std::vec::IntoIter<Record>,
}

impl MemorySource {
    /// Stream the given records in order
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }

    /// Stream bare codes without taxids
    pub fn from_codes(codes: &[u64]) -> Self {
        Self::new(codes.iter().map(|&c| Record::plain(c)).collect())
    }
}

impl From<Vec<Record>> for MemorySource {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}

impl RecordSource for MemorySource {
    fn next_record(&mut self) -> Result<Option<Record>> {
        Ok(self.records.next())
    }
}

/// Several sources read back to back
pub struct ChainSource<'a> {
    sources: Vec<Box<dyn RecordSource + 'a>>,
    current: usize,
}

impl<'a> ChainSource<'a> {
    /// Chain the sources in order
    pub fn new(sources: Vec<Box<dyn RecordSource + 'a>>) -> Self {
        Self { sources, current: 0 }
    }
}

impl RecordSource for ChainSource<'_> {
    fn next_record(&mut self) -> Result<Option<Record>> {
        while let Some(source) = self.sources.get_mut(self.current) {
            if let Some(record) = source.next_record()? {
                return Ok(Some(record));
            }
            self.current += 1;
        }
        Ok(None)
    }

    fn name(&self) -> &Path {
        match self.sources.get(self.current) {
            Some(source) => source.name(),
            None => Path::new("<chain>"),
        }
    }
}

/// Sink wrapper counting the records passed through
pub struct CountingSink<S> {
    inner: S,
    count: u64,
}

impl<S: RecordSink> CountingSink<S> {
    /// Wrap a sink
    pub fn new(inner: S) -> Self {
        Self { inner, count: 0 }
    }

    /// Records written so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Unwrap the inner sink
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: RecordSink> RecordSink for CountingSink<S> {
    fn write_record(&mut self, record: Record) -> Result<()> {
        self.inner.write_record(record)?;
        self.count += 1;
        Ok(())
    }
}

/// Fail with `IncompatibleInputs` when `next` breaks sorted order after `prev`
#[inline]
pub(crate) fn ensure_sorted(source: &dyn RecordSource, prev: u64, next: u64) -> Result<()> {
    if next < prev {
        return Err(KmerSetError::IncompatibleInputs {
            path: source.name().to_path_buf(),
            reason: format!("records are not sorted ({next} follows {prev})"),
        });
    }
    Ok(())
}
