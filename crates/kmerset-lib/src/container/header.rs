//! Container header and flag set
//!
//! ```text
//! magic[8] = "KMERSET\x01"
//! version_major u64 | version_minor u64
//! k u64
//! flags u32
//! record_count i64          (-1 = unknown)
//! global_taxid u32          (0 = none)
//! max_taxid u32
//! ```
//!
//! All integers are big-endian, matching the body.

use std::fmt;
use std::io::{self, Read, Write};
use std::ops::BitOr;
use std::path::Path;

use crate::constants::{is_valid_k, FORMAT_VERSION, MAGIC, UNKNOWN_RECORD_COUNT};
use crate::error::{KmerSetError, Result};
use crate::kmer::compact_width;
use crate::record::StreamInfo;

/// Flag bitset stored in the header
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u32);

impl Flags {
    /// Codes are canonical k-mers
    pub const CANONICAL: Flags = Flags(1 << 0);
    /// Codes are non-decreasing
    pub const SORTED: Flags = Flags(1 << 1);
    /// Codes use the minimum byte width for k
    pub const COMPACT: Flags = Flags(1 << 2);
    /// Each record is followed by a taxid
    pub const INCLUDE_TAXID: Flags = Flags(1 << 3);
    /// Codes are hashes, not k-mer encodings
    pub const HASHED: Flags = Flags(1 << 4);
    /// The record count follows the body
    pub const COUNT_TRAILER: Flags = Flags(1 << 5);

    const ALL: u32 = 0b11_1111;

    /// No flags set
    pub const fn empty() -> Self {
        Flags(0)
    }

    /// Raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Parse raw bits, rejecting unknown ones
    pub const fn from_bits(bits: u32) -> Option<Self> {
        if bits & !Self::ALL != 0 {
            None
        } else {
            Some(Flags(bits))
        }
    }

    /// Whether every flag in `other` is set
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set or clear the flags in `other`
    pub fn set(&mut self, other: Flags, value: bool) {
        if value {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl Flags {
    const NAMES: [(Flags, &'static str); 6] = [
        (Self::CANONICAL, "Canonical"),
        (Self::SORTED, "Sorted"),
        (Self::COMPACT, "Compact"),
        (Self::INCLUDE_TAXID, "IncludeTaxid"),
        (Self::HASHED, "Hashed"),
        (Self::COUNT_TRAILER, "CountTrailer"),
    ];

    /// Names of the set flags, in bit order
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set: Vec<&str> = self.names().collect();
        write!(f, "{{{}}}", set.join(", "))
    }
}

/// `Sorted|Compact`, or `none` when empty
impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set: Vec<&str> = self.names().collect();
        if set.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&set.join("|"))
        }
    }
}

/// Header of a kmerset container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Format version major number
    pub version_major: u64,
    /// Format version minor number
    pub version_minor: u64,
    /// K-mer size
    pub k: usize,
    /// Flag set
    pub flags: Flags,
    /// Number of records, `None` when unknown at write time
    pub record_count: Option<u64>,
    /// Taxid applying to every record, 0 for none
    pub global_taxid: u32,
    /// Largest per-record taxid; sizes the taxid field
    pub max_taxid: u32,
}

impl ContainerHeader {
    /// Create a header for the current format version
    ///
    /// Containers with [`Flags::INCLUDE_TAXID`] default to 4-byte taxids.
    pub fn new(k: usize, flags: Flags) -> Self {
        let max_taxid = if flags.contains(Flags::INCLUDE_TAXID) {
            u32::MAX
        } else {
            0
        };
        Self {
            version_major: FORMAT_VERSION.0,
            version_minor: FORMAT_VERSION.1,
            k,
            flags,
            record_count: None,
            global_taxid: 0,
            max_taxid,
        }
    }

    /// Derive a header from a stream schema
    pub fn for_stream(info: &StreamInfo, compact: bool) -> Self {
        let mut flags = Flags::empty();
        flags.set(Flags::CANONICAL, info.canonical);
        flags.set(Flags::SORTED, info.sorted);
        flags.set(Flags::HASHED, info.hashed);
        flags.set(Flags::INCLUDE_TAXID, info.has_taxid);
        flags.set(Flags::COMPACT, compact);
        Self::new(info.k, flags)
    }

    /// Builder-style setter for the maximum taxid
    pub fn with_max_taxid(mut self, max_taxid: u32) -> Self {
        self.max_taxid = max_taxid;
        self
    }

    /// Builder-style setter for the global taxid
    pub fn with_global_taxid(mut self, taxid: u32) -> Self {
        self.global_taxid = taxid;
        self
    }

    /// Builder-style setter for a known record count
    pub fn with_record_count(mut self, count: u64) -> Self {
        self.record_count = Some(count);
        self
    }

    /// Whether the records are sorted
    pub fn is_sorted(&self) -> bool {
        self.flags.contains(Flags::SORTED)
    }

    /// Whether the codes are canonical
    pub fn is_canonical(&self) -> bool {
        self.flags.contains(Flags::CANONICAL)
    }

    /// Whether compact code widths are used
    pub fn is_compact(&self) -> bool {
        self.flags.contains(Flags::COMPACT)
    }

    /// Whether codes are hashes
    pub fn is_hashed(&self) -> bool {
        self.flags.contains(Flags::HASHED)
    }

    /// Whether each record stores a taxid
    pub fn has_taxid_info(&self) -> bool {
        self.flags.contains(Flags::INCLUDE_TAXID)
    }

    /// Bytes per stored code
    pub fn code_width(&self) -> usize {
        if self.is_compact() && !self.is_hashed() {
            compact_width(self.k)
        } else {
            8
        }
    }

    /// Bytes per stored taxid (0 without taxid info)
    pub fn taxid_width(&self) -> usize {
        if !self.has_taxid_info() {
            0
        } else if self.max_taxid <= u8::MAX as u32 {
            1
        } else if self.max_taxid <= u16::MAX as u32 {
            2
        } else {
            4
        }
    }

    /// Bytes per stored record
    pub fn record_width(&self) -> usize {
        self.code_width() + self.taxid_width()
    }

    /// Upper bound of the taxids a reader of this container can return
    pub fn taxid_bound(&self) -> u32 {
        if self.has_taxid_info() {
            self.max_taxid.max(self.global_taxid)
        } else {
            self.global_taxid
        }
    }

    /// Schema of the stored stream
    ///
    /// A non-zero global taxid counts as taxid information.
    pub fn stream_info(&self) -> StreamInfo {
        StreamInfo {
            k: self.k,
            canonical: self.is_canonical(),
            sorted: self.is_sorted(),
            hashed: self.is_hashed(),
            has_taxid: self.has_taxid_info() || self.global_taxid != 0,
        }
    }

    /// Write header to a writer
    pub fn write(&self, writer: &mut dyn Write) -> io::Result<()> {
        let count = match self.record_count {
            Some(n) => n as i64,
            None => UNKNOWN_RECORD_COUNT,
        };
        writer.write_all(MAGIC)?;
        writer.write_all(&self.version_major.to_be_bytes())?;
        writer.write_all(&self.version_minor.to_be_bytes())?;
        writer.write_all(&(self.k as u64).to_be_bytes())?;
        writer.write_all(&self.flags.bits().to_be_bytes())?;
        writer.write_all(&count.to_be_bytes())?;
        writer.write_all(&self.global_taxid.to_be_bytes())?;
        writer.write_all(&self.max_taxid.to_be_bytes())?;
        Ok(())
    }

    /// Read and validate a header; `path` is used in error messages
    pub fn read(reader: &mut dyn Read, path: &Path) -> Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => KmerSetError::InvalidFileFormat {
                path: path.to_path_buf(),
                detail: "file too short for a header".to_string(),
            },
            _ => KmerSetError::io(path, "read header", e),
        })?;
        if &magic != MAGIC {
            return Err(KmerSetError::InvalidFileFormat {
                path: path.to_path_buf(),
                detail: "bad magic number".to_string(),
            });
        }

        let mut rest = [0u8; 44];
        reader.read_exact(&mut rest).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => KmerSetError::InvalidFileFormat {
                path: path.to_path_buf(),
                detail: "truncated header".to_string(),
            },
            _ => KmerSetError::io(path, "read header", e),
        })?;

        let u64_at = |at: usize| u64::from_be_bytes(rest[at..at + 8].try_into().unwrap_or([0; 8]));
        let u32_at = |at: usize| u32::from_be_bytes(rest[at..at + 4].try_into().unwrap_or([0; 4]));

        let version_major = u64_at(0);
        let version_minor = u64_at(8);
        if version_major != FORMAT_VERSION.0 {
            return Err(KmerSetError::UnsupportedVersion {
                path: path.to_path_buf(),
                major: version_major,
                minor: version_minor,
            });
        }

        let k = u64_at(16) as usize;
        if !is_valid_k(k) {
            return Err(KmerSetError::InvalidFileFormat {
                path: path.to_path_buf(),
                detail: format!("k={k} is outside [1, 32]"),
            });
        }

        let flags = Flags::from_bits(u32_at(24)).ok_or_else(|| KmerSetError::InvalidFileFormat {
            path: path.to_path_buf(),
            detail: format!("unknown flag bits {:#x}", u32_at(24)),
        })?;

        let count = u64_at(28) as i64;
        let record_count = match count {
            UNKNOWN_RECORD_COUNT => None,
            n if n >= 0 => Some(n as u64),
            n => {
                return Err(KmerSetError::InvalidFileFormat {
                    path: path.to_path_buf(),
                    detail: format!("negative record count {n}"),
                })
            }
        };

        Ok(Self {
            version_major,
            version_minor,
            k,
            flags,
            record_count,
            global_taxid: u32_at(36),
            max_taxid: u32_at(40),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::HEADER_SIZE;

    #[test]
    fn test_header_roundtrip() {
        let header = ContainerHeader::new(21, Flags::SORTED | Flags::CANONICAL | Flags::INCLUDE_TAXID)
            .with_max_taxid(5000)
            .with_global_taxid(7)
            .with_record_count(42);

        let mut buffer: Vec<u8> = Vec::new();
        header.write(&mut buffer).unwrap();
        assert_eq!(buffer.len() as u64, HEADER_SIZE);

        let header2 = ContainerHeader::read(&mut buffer.as_slice(), Path::new("mem")).unwrap();
        assert_eq!(header, header2);
        assert_eq!(header2.taxid_width(), 2);
    }

    #[test]
    fn test_unknown_count_roundtrip() {
        let header = ContainerHeader::new(31, Flags::empty());
        let mut buffer: Vec<u8> = Vec::new();
        header.write(&mut buffer).unwrap();
        let header2 = ContainerHeader::read(&mut buffer.as_slice(), Path::new("mem")).unwrap();
        assert_eq!(header2.record_count, None);
    }

    #[test]
    fn test_bad_magic() {
        let mut buffer = vec![0u8; HEADER_SIZE as usize];
        buffer[..8].copy_from_slice(b"NOTAKMER");
        let err = ContainerHeader::read(&mut buffer.as_slice(), Path::new("bad.kms")).unwrap_err();
        assert!(matches!(err, KmerSetError::InvalidFileFormat { .. }));
    }

    #[test]
    fn test_short_file() {
        let err = ContainerHeader::read(&mut &b"KMER"[..], Path::new("short.kms")).unwrap_err();
        assert!(matches!(err, KmerSetError::InvalidFileFormat { .. }));
    }

    #[test]
    fn test_unsupported_version() {
        let mut header = ContainerHeader::new(21, Flags::empty());
        header.version_major = 9;
        let mut buffer: Vec<u8> = Vec::new();
        header.write(&mut buffer).unwrap();
        let err = ContainerHeader::read(&mut buffer.as_slice(), Path::new("v9.kms")).unwrap_err();
        assert!(matches!(err, KmerSetError::UnsupportedVersion { major: 9, .. }));
    }

    #[test]
    fn test_widths() {
        let h = ContainerHeader::new(21, Flags::COMPACT);
        assert_eq!(h.code_width(), 6);
        assert_eq!(h.taxid_width(), 0);

        let h = ContainerHeader::new(21, Flags::COMPACT | Flags::HASHED);
        assert_eq!(h.code_width(), 8);

        let h = ContainerHeader::new(21, Flags::INCLUDE_TAXID);
        assert_eq!(h.code_width(), 8);
        assert_eq!(h.taxid_width(), 4);
        assert_eq!(h.clone().with_max_taxid(255).taxid_width(), 1);
        assert_eq!(h.clone().with_max_taxid(256).taxid_width(), 2);
        assert_eq!(h.with_max_taxid(65_536).taxid_width(), 4);
    }

    #[test]
    fn test_flags() {
        let mut flags = Flags::SORTED | Flags::HASHED;
        assert!(flags.contains(Flags::SORTED));
        assert!(!flags.contains(Flags::COMPACT));
        flags.set(Flags::SORTED, false);
        assert!(!flags.contains(Flags::SORTED));
        assert_eq!(format!("{flags:?}"), "{Hashed}");
        assert!(Flags::from_bits(1 << 20).is_none());
    }

    #[test]
    fn test_flags_display() {
        let flags = Flags::SORTED | Flags::COMPACT | Flags::INCLUDE_TAXID;
        assert_eq!(flags.to_string(), "Sorted|Compact|IncludeTaxid");
        assert_eq!(format!("{flags:?}"), "{Sorted, Compact, IncludeTaxid}");
        assert_eq!(Flags::empty().to_string(), "none");
        assert_eq!(format!("{}", ContainerHeader::new(4, Flags::HASHED).flags), "Hashed");
    }

    #[test]
    fn test_global_taxid_counts_as_taxid_info() {
        let h = ContainerHeader::new(21, Flags::empty()).with_global_taxid(562);
        assert!(h.stream_info().has_taxid);
        assert!(!h.has_taxid_info());
    }
}
