//! Sequential container reader
//!
//! Records are decoded from a small read-ahead buffer. For containers with
//! a count trailer the last [`TRAILER_SIZE`] bytes are always held back, so
//! the trailer is never mistaken for a record.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::constants::{READ_BUFFER_SIZE, TRAILER_SIZE};
use crate::container::header::{ContainerHeader, Flags};
use crate::error::{KmerSetError, Result};
use crate::record::{Record, RecordSource, StreamInfo};

/// Reads records from a container
pub struct ContainerReader<R: Read> {
    reader: R,
    header: ContainerHeader,
    path: PathBuf,
    code_width: usize,
    taxid_width: usize,
    tail: usize,
    pending: Vec<u8>,
    start: usize,
    read: u64,
    done: bool,
}

impl<R: Read> ContainerReader<R> {
    /// Read and validate the header; `path` names the stream in errors
    pub fn new(mut reader: R, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let header = ContainerHeader::read(&mut reader, &path)?;
        let tail = if header.flags.contains(Flags::COUNT_TRAILER) {
            TRAILER_SIZE
        } else {
            0
        };
        Ok(Self {
            code_width: header.code_width(),
            taxid_width: header.taxid_width(),
            reader,
            header,
            path,
            tail,
            pending: Vec::new(),
            start: 0,
            read: 0,
            done: false,
        })
    }

    /// The parsed header
    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Path or name of the stream
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// K-mer size
    pub fn k(&self) -> usize {
        self.header.k
    }

    /// Whether the records are sorted
    pub fn is_sorted(&self) -> bool {
        self.header.is_sorted()
    }

    /// Whether the codes are canonical
    pub fn is_canonical(&self) -> bool {
        self.header.is_canonical()
    }

    /// Whether compact code widths are used
    pub fn is_compact(&self) -> bool {
        self.header.is_compact()
    }

    /// Whether codes are hashes
    pub fn is_hashed(&self) -> bool {
        self.header.is_hashed()
    }

    /// Whether records carry per-record taxids
    pub fn has_taxid_info(&self) -> bool {
        self.header.has_taxid_info()
    }

    /// Record count from the header, if known
    pub fn record_count(&self) -> Option<u64> {
        self.header.record_count
    }

    /// Global taxid from the header (0 = none)
    pub fn global_taxid(&self) -> u32 {
        self.header.global_taxid
    }

    /// Schema of the stored stream
    pub fn stream_info(&self) -> StreamInfo {
        self.header.stream_info()
    }

    /// Records read so far
    pub fn records_read(&self) -> u64 {
        self.read
    }

    fn available(&self) -> usize {
        self.pending.len() - self.start
    }

    /// Buffer at least `want` bytes unless the stream ends first
    fn fill(&mut self, want: usize) -> io::Result<()> {
        if self.available() >= want {
            return Ok(());
        }
        self.pending.drain(..self.start);
        self.start = 0;
        while self.pending.len() < want {
            let old = self.pending.len();
            self.pending.resize(old + READ_BUFFER_SIZE.max(want), 0);
            match self.reader.read(&mut self.pending[old..]) {
                Ok(0) => {
                    self.pending.truncate(old);
                    break;
                }
                Ok(n) => self.pending.truncate(old + n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => self.pending.truncate(old),
                Err(e) => {
                    self.pending.truncate(old);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn truncated(&self) -> KmerSetError {
        KmerSetError::io(
            &self.path,
            "read record",
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("truncated container after {} records", self.read),
            ),
        )
    }

    /// Read the next record; `Ok(None)` marks end-of-stream
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        if self.done {
            return Ok(None);
        }
        if self.header.record_count == Some(self.read) {
            self.done = true;
            return Ok(None);
        }

        let width = self.code_width + self.taxid_width;
        self.fill(width + self.tail)
            .map_err(|e| KmerSetError::io(&self.path, "read record", e))?;
        let available = self.available();

        if available < width + self.tail {
            if available != self.tail {
                return Err(self.truncated());
            }
            self.done = true;
            if let Some(declared) = self.header.record_count {
                // Count known up front but the body ended early
                return Err(KmerSetError::RecordCountMismatch {
                    path: self.path.clone(),
                    declared,
                    actual: self.read,
                });
            }
            if self.tail > 0 {
                let trailer: [u8; TRAILER_SIZE] = self.pending[self.start..self.start + TRAILER_SIZE]
                    .try_into()
                    .map_err(|_| self.truncated())?;
                let declared = i64::from_be_bytes(trailer);
                if declared < 0 || declared as u64 != self.read {
                    return Err(KmerSetError::RecordCountMismatch {
                        path: self.path.clone(),
                        declared: declared.max(0) as u64,
                        actual: self.read,
                    });
                }
            }
            return Ok(None);
        }

        let bytes = &self.pending[self.start..self.start + width];
        let mut code = [0u8; 8];
        code[8 - self.code_width..].copy_from_slice(&bytes[..self.code_width]);
        let taxid = if self.taxid_width > 0 {
            let mut taxid = [0u8; 4];
            taxid[4 - self.taxid_width..].copy_from_slice(&bytes[self.code_width..]);
            u32::from_be_bytes(taxid)
        } else {
            self.header.global_taxid
        };
        self.start += width;
        self.read += 1;
        Ok(Some(Record::new(u64::from_be_bytes(code), taxid)))
    }

    /// Iterate over the remaining records; iteration stops after the first error
    pub fn records(&mut self) -> impl Iterator<Item = Result<Record>> + '_ {
        std::iter::from_fn(move || match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        })
    }
}

impl<R: Read> RecordSource for ContainerReader<R> {
    fn next_record(&mut self) -> Result<Option<Record>> {
        self.read_record()
    }

    fn name(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::writer::ContainerWriter;
    use std::io::Cursor;

    fn write_stream(header: ContainerHeader, records: &[Record]) -> Vec<u8> {
        let mut writer = ContainerWriter::new(Vec::new(), header, "mem").unwrap();
        for &r in records {
            writer.write_record(r).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_trailer_stream_roundtrip() {
        let records = vec![Record::new(5, 9), Record::new(3, 300), Record::new(3, 0)];
        let header = ContainerHeader::new(8, Flags::COMPACT | Flags::INCLUDE_TAXID).with_max_taxid(300);
        let bytes = write_stream(header, &records);

        let mut reader = ContainerReader::new(bytes.as_slice(), "mem").unwrap();
        assert!(reader.has_taxid_info());
        assert_eq!(reader.record_count(), None);
        let back: Vec<Record> = reader.records().collect::<Result<_>>().unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_empty_sorted_canonical() {
        let header = ContainerHeader::new(21, Flags::SORTED | Flags::CANONICAL);
        let mut writer = ContainerWriter::new_seekable(Cursor::new(Vec::new()), header, "mem").unwrap();
        assert_eq!(writer.records_written(), 0);
        let bytes = writer.finish_seekable().unwrap().into_inner();

        let mut reader = ContainerReader::new(bytes.as_slice(), "mem").unwrap();
        assert_eq!(reader.record_count(), Some(0));
        assert!(reader.is_sorted());
        assert!(reader.is_canonical());
        assert_eq!(reader.read_record().unwrap(), None);
        assert_eq!(reader.read_record().unwrap(), None);
    }

    #[test]
    fn test_global_taxid_fills_records() {
        let header = ContainerHeader::new(4, Flags::empty()).with_global_taxid(562);
        let bytes = write_stream(header, &[Record::plain(1), Record::plain(2)]);
        let mut reader = ContainerReader::new(bytes.as_slice(), "mem").unwrap();
        let back: Vec<Record> = reader.records().collect::<Result<_>>().unwrap();
        assert_eq!(back, vec![Record::new(1, 562), Record::new(2, 562)]);
    }

    #[test]
    fn test_flag_queries_do_not_consume_records() {
        let header = ContainerHeader::new(4, Flags::SORTED).with_record_count(2);
        let mut writer = ContainerWriter::new(Vec::new(), header, "mem").unwrap();
        writer.write_record(Record::plain(1)).unwrap();
        writer.write_record(Record::plain(2)).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = ContainerReader::new(bytes.as_slice(), "mem").unwrap();
        assert!(reader.is_sorted());
        assert!(!reader.is_canonical());
        assert_eq!(reader.records_read(), 0);
        let codes: Vec<u64> = reader.records().map(|r| r.unwrap().code).collect();
        assert_eq!(codes, vec![1, 2]);
        assert!(reader.is_sorted());
    }

    #[test]
    fn test_records_stop_after_error() {
        let header = ContainerHeader::new(32, Flags::empty()).with_record_count(2);
        let mut writer = ContainerWriter::new(Vec::new(), header, "mem").unwrap();
        writer.write_record(Record::plain(1)).unwrap();
        writer.write_record(Record::plain(2)).unwrap();
        let mut bytes = writer.finish().unwrap();
        bytes.truncate(bytes.len() - 1);

        let mut reader = ContainerReader::new(bytes.as_slice(), "cut.kms").unwrap();
        let results: Vec<Result<Record>> = reader.records().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().ok(), Some(&Record::plain(1)));
        assert!(results[1].is_err());
        assert_eq!(reader.read_record().unwrap(), None);
    }

    #[test]
    fn test_truncated_body() {
        let header = ContainerHeader::new(32, Flags::empty()).with_record_count(2);
        let mut writer = ContainerWriter::new(Vec::new(), header, "mem").unwrap();
        writer.write_record(Record::plain(1)).unwrap();
        writer.write_record(Record::plain(2)).unwrap();
        let mut bytes = writer.finish().unwrap();
        bytes.truncate(bytes.len() - 3);

        let mut reader = ContainerReader::new(bytes.as_slice(), "cut.kms").unwrap();
        assert_eq!(reader.read_record().unwrap(), Some(Record::plain(1)));
        assert!(matches!(reader.read_record(), Err(KmerSetError::Io { .. })));
    }

    #[test]
    fn test_trailer_mismatch_detected() {
        let header = ContainerHeader::new(4, Flags::empty());
        let mut bytes = write_stream(header, &[Record::plain(1)]);
        let len = bytes.len();
        bytes[len - 8..].copy_from_slice(&7i64.to_be_bytes());

        let mut reader = ContainerReader::new(bytes.as_slice(), "mem").unwrap();
        assert_eq!(reader.read_record().unwrap(), Some(Record::plain(1)));
        assert!(matches!(
            reader.read_record(),
            Err(KmerSetError::RecordCountMismatch { declared: 7, actual: 1, .. })
        ));
    }

    #[test]
    fn test_invalid_magic() {
        let err = ContainerReader::new(&b"garbage that is not a container at all, no....."[..], "x")
            .err()
            .unwrap();
        assert!(matches!(err, KmerSetError::InvalidFileFormat { .. }));
    }

    /// Reader that hands out one byte at a time
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.0[0];
            self.0 = &self.0[1..];
            Ok(1)
        }
    }

    #[test]
    fn test_short_reads() {
        let records: Vec<Record> = (0..100).map(|c| Record::new(c * 3, c as u32)).collect();
        let header = ContainerHeader::new(10, Flags::COMPACT | Flags::INCLUDE_TAXID).with_max_taxid(200);
        let bytes = write_stream(header, &records);
        let mut reader = ContainerReader::new(Trickle(&bytes), "mem").unwrap();
        let back: Vec<Record> = reader.records().collect::<Result<_>>().unwrap();
        assert_eq!(back, records);
    }
}
