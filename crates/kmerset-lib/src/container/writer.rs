//! Sequential container writer
//!
//! The header goes out first. When the record count is unknown at open time
//! it is fixed up on close: seekable writers patch the header in place,
//! plain streams append a trailing count block flagged in the header.

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::constants::RECORD_COUNT_OFFSET;
use crate::container::header::{ContainerHeader, Flags};
use crate::error::{KmerSetError, Result};
use crate::kmer::check_code;
use crate::record::{Record, RecordSink};

/// Writes records into a container
pub struct ContainerWriter<W: Write> {
    writer: W,
    header: ContainerHeader,
    path: PathBuf,
    code_width: usize,
    taxid_width: usize,
    written: u64,
}

impl<W: Write> ContainerWriter<W> {
    /// Open a writer on a plain stream
    ///
    /// If the header does not declare a record count, the count is appended
    /// after the body on [`finish`](Self::finish).
    pub fn new(writer: W, mut header: ContainerHeader, path: impl AsRef<Path>) -> Result<Self> {
        header.flags.set(Flags::COUNT_TRAILER, header.record_count.is_none());
        Self::start(writer, header, path.as_ref())
    }

    fn start(mut writer: W, header: ContainerHeader, path: &Path) -> Result<Self> {
        header
            .write(&mut writer)
            .map_err(|e| KmerSetError::io(path, "write header", e))?;
        Ok(Self {
            code_width: header.code_width(),
            taxid_width: header.taxid_width(),
            writer,
            header,
            path: path.to_path_buf(),
            written: 0,
        })
    }

    /// The header as written
    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Records written so far
    pub fn records_written(&self) -> u64 {
        self.written
    }

    /// Append one record
    ///
    /// # Errors
    /// Rejects codes outside `[0, 4^k)` for k-mer containers and taxids above
    /// the declared maximum. Taxids are dropped silently when the container
    /// stores none.
    pub fn write_record(&mut self, record: Record) -> Result<()> {
        if !self.header.is_hashed() {
            check_code(record.code, self.header.k)?;
        }
        let mut buf = [0u8; 12];
        let w = self.code_width;
        buf[..w].copy_from_slice(&record.code.to_be_bytes()[8 - w..]);
        let t = self.taxid_width;
        if t > 0 {
            if record.taxid > self.header.max_taxid {
                return Err(KmerSetError::TaxidOverflow {
                    taxid: record.taxid,
                    max: self.header.max_taxid,
                });
            }
            buf[w..w + t].copy_from_slice(&record.taxid.to_be_bytes()[4 - t..]);
        }
        self.writer
            .write_all(&buf[..w + t])
            .map_err(|e| KmerSetError::io(&self.path, "write record", e))?;
        self.written += 1;
        Ok(())
    }

    fn check_declared_count(&self) -> Result<()> {
        match self.header.record_count {
            Some(declared) if declared != self.written => Err(KmerSetError::RecordCountMismatch {
                path: self.path.clone(),
                declared,
                actual: self.written,
            }),
            _ => Ok(()),
        }
    }

    /// Close a plain-stream container, appending the count trailer if needed
    pub fn finish(mut self) -> Result<W> {
        self.check_declared_count()?;
        if self.header.flags.contains(Flags::COUNT_TRAILER) {
            self.writer
                .write_all(&(self.written as i64).to_be_bytes())
                .map_err(|e| KmerSetError::io(&self.path, "write count trailer", e))?;
        }
        self.writer
            .flush()
            .map_err(|e| KmerSetError::io(&self.path, "flush", e))?;
        Ok(self.writer)
    }
}

impl<W: Write + Seek> ContainerWriter<W> {
    /// Open a writer on a seekable stream
    ///
    /// An unknown record count is patched into the header on
    /// [`finish_seekable`](Self::finish_seekable).
    pub fn new_seekable(writer: W, header: ContainerHeader, path: impl AsRef<Path>) -> Result<Self> {
        Self::start(writer, header, path.as_ref())
    }

    /// Close a seekable container, patching the header count if it was unknown
    pub fn finish_seekable(mut self) -> Result<W> {
        if self.header.record_count.is_some() || self.header.flags.contains(Flags::COUNT_TRAILER) {
            return self.finish();
        }
        let path = self.path.clone();
        let io_err = |e| KmerSetError::io(&path, "patch record count", e);
        let end = self.writer.stream_position().map_err(io_err)?;
        self.writer
            .seek(SeekFrom::Start(RECORD_COUNT_OFFSET))
            .map_err(io_err)?;
        self.writer
            .write_all(&(self.written as i64).to_be_bytes())
            .map_err(io_err)?;
        self.writer.seek(SeekFrom::Start(end)).map_err(io_err)?;
        self.writer.flush().map_err(io_err)?;
        self.header.record_count = Some(self.written);
        Ok(self.writer)
    }
}

impl<W: Write> RecordSink for ContainerWriter<W> {
    fn write_record(&mut self, record: Record) -> Result<()> {
        ContainerWriter::write_record(self, record)
    }
}
