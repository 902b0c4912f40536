//! Constants and configuration defaults for kmerset
//!
//! This module defines the container format identifiers, the supported
//! k-mer range and the resource defaults used by the sort engine.

/// Library version: (major, minor, patch)
pub const VERSION: (u8, u8, u8) = (0, 1, 0);

/// Magic bytes opening every kmerset container
pub const MAGIC: &[u8; 8] = b"KMERSET\x01";

/// Container format version: (major, minor)
/// Increment major on breaking changes, minor on compatible changes
pub const FORMAT_VERSION: (u64, u64) = (1, 0);

/// Size of the fixed container header in bytes
///
/// magic (8) + version (16) + k (8) + flags (4) + record count (8)
/// + global taxid (4) + max taxid (4)
pub const HEADER_SIZE: u64 = 52;

/// Byte offset of the record count inside the header
pub const RECORD_COUNT_OFFSET: u64 = 36;

/// Size of the optional trailing record-count block
pub const TRAILER_SIZE: usize = 8;

/// Sentinel written in place of an unknown record count
pub const UNKNOWN_RECORD_COUNT: i64 = -1;

/// Minimum k-mer size supported
pub const MIN_K: usize = 1;

/// Maximum k-mer size supported (2 bits per base in a u64)
pub const MAX_K: usize = 32;

/// The root of every taxonomy
pub const ROOT_TAXID: u32 = 1;

/// Taxid meaning "unknown"; absorbing under LCA folding
pub const UNKNOWN_TAXID: u32 = 0;

/// In-memory size of one record, used to convert memory budgets to element counts
pub const RECORD_SIZE_BYTES: usize = std::mem::size_of::<crate::record::Record>();

/// Bytes per MiB
pub const MIB: usize = 1024 * 1024;

/// Default number of records held in one in-memory chunk (1 GiB of records)
pub const DEFAULT_CHUNK_ELEMENTS: usize = 1024 * MIB / RECORD_SIZE_BYTES;

/// Default number of chunk files merged at once
pub const DEFAULT_MAX_OPEN_FILES: usize = 256;

/// Read-ahead size used by container readers
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Write buffer size used for container files
pub const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

/// Check if a k-mer size is valid
#[inline]
pub const fn is_valid_k(k: usize) -> bool {
    k >= MIN_K && k <= MAX_K
}
