//! Persisted record container
//!
//! A container is a fixed header followed by a flat body of records. Codes
//! and taxids are stored big-endian at the narrowest width the header allows.
//! See [`header`] for the exact layout.

pub mod header;
pub mod reader;
pub mod writer;

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

pub use header::{ContainerHeader, Flags};
pub use reader::ContainerReader;
pub use writer::ContainerWriter;

use crate::constants::WRITE_BUFFER_SIZE;
use crate::error::{KmerSetError, Result};
use crate::record::StreamInfo;

/// Container writer over a buffered file
pub type FileContainerWriter = ContainerWriter<BufWriter<File>>;

/// Open a container file for sequential reading
///
/// `ContainerReader` buffers internally, so the file is read unwrapped.
pub fn open_container<P: AsRef<Path>>(path: P) -> Result<ContainerReader<File>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| KmerSetError::io(path, "open container", e))?;
    ContainerReader::new(file, path)
}

/// Create (or truncate) a container file
///
/// Close it with [`ContainerWriter::finish_seekable`] so an unknown record
/// count is patched into the header.
pub fn create_container<P: AsRef<Path>>(path: P, header: ContainerHeader) -> Result<FileContainerWriter> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| KmerSetError::io(path, "create container", e))?;
    ContainerWriter::new_seekable(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file), header, path)
}

/// Read only the header of a container file
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<ContainerHeader> {
    Ok(open_container(path)?.header().clone())
}

/// Check that the inputs of a multi-input operation agree on their schema
///
/// Inputs must share k, the canonical flag and the hashed flag. Taxid
/// presence must also agree unless `allow_mixed_taxid` is set. Returns the
/// combined schema: sorted iff every input is sorted, with taxids iff any
/// input has them.
pub fn check_compatible<'p, I>(inputs: I, allow_mixed_taxid: bool) -> Result<StreamInfo>
where
    I: IntoIterator<Item = (&'p Path, StreamInfo)>,
{
    let mut iter = inputs.into_iter();
    let (first_path, mut combined) = iter
        .next()
        .ok_or_else(|| KmerSetError::InvalidConfiguration("at least one input is required".to_string()))?;

    for (path, info) in iter {
        let mismatch = |reason: String| KmerSetError::IncompatibleInputs {
            path: path.to_path_buf(),
            reason,
        };
        if info.k != combined.k {
            return Err(mismatch(format!("k={}, expected k={}", info.k, combined.k)));
        }
        if info.canonical != combined.canonical {
            return Err(mismatch(format!(
                "canonical={}, expected canonical={} (as in '{}')",
                info.canonical,
                combined.canonical,
                first_path.display()
            )));
        }
        if info.hashed != combined.hashed {
            return Err(mismatch(format!(
                "hashed={}, expected hashed={} (as in '{}')",
                info.hashed,
                combined.hashed,
                first_path.display()
            )));
        }
        if info.has_taxid != combined.has_taxid && !allow_mixed_taxid {
            return Err(KmerSetError::TaxidInconsistency {
                path: path.to_path_buf(),
            });
        }
        combined.sorted &= info.sorted;
        combined.has_taxid |= info.has_taxid;
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use tempfile::TempDir;

    #[test]
    fn test_file_roundtrip_patches_count() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.kms");
        let header = ContainerHeader::new(21, Flags::SORTED | Flags::CANONICAL | Flags::COMPACT);
        let mut writer = create_container(&path, header).unwrap();
        writer.write_record(Record::plain(3)).unwrap();
        writer.write_record(Record::plain(9)).unwrap();
        writer.finish_seekable().unwrap();

        let header = read_header(&path).unwrap();
        assert_eq!(header.record_count, Some(2));
        let mut reader = open_container(&path).unwrap();
        let codes: Vec<u64> = reader.records().map(|r| r.unwrap().code).collect();
        assert_eq!(codes, vec![3, 9]);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = open_container(dir.path().join("nope.kms")).err().unwrap();
        assert!(matches!(err, KmerSetError::Io { operation: "open container", .. }));
    }

    fn info(k: usize, sorted: bool, has_taxid: bool) -> StreamInfo {
        StreamInfo {
            sorted,
            has_taxid,
            ..StreamInfo::kmers(k)
        }
    }

    #[test]
    fn test_check_compatible_combines() {
        let a = Path::new("a");
        let b = Path::new("b");
        let combined = check_compatible([(a, info(21, true, false)), (b, info(21, false, false))], false).unwrap();
        assert!(!combined.sorted);
        assert!(!combined.has_taxid);
    }

    #[test]
    fn test_check_compatible_names_offender() {
        let err = check_compatible(
            [
                (Path::new("a"), info(21, true, false)),
                (Path::new("b"), info(31, true, false)),
            ],
            false,
        )
        .unwrap_err();
        match err {
            KmerSetError::IncompatibleInputs { path, .. } => assert_eq!(path, Path::new("b")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_check_compatible_taxid_modes() {
        let inputs = [
            (Path::new("a"), info(21, true, true)),
            (Path::new("b"), info(21, true, false)),
        ];
        assert!(matches!(
            check_compatible(inputs, false),
            Err(KmerSetError::TaxidInconsistency { .. })
        ));
        let combined = check_compatible(inputs, true).unwrap();
        assert!(combined.has_taxid);
    }

    #[test]
    fn test_check_compatible_canonical_and_hashed() {
        let canonical = StreamInfo {
            canonical: true,
            ..StreamInfo::kmers(21)
        };
        let hashed = StreamInfo {
            hashed: true,
            ..StreamInfo::kmers(21)
        };
        assert!(check_compatible([(Path::new("a"), StreamInfo::kmers(21)), (Path::new("b"), canonical)], true).is_err());
        assert!(check_compatible([(Path::new("a"), StreamInfo::kmers(21)), (Path::new("b"), hashed)], true).is_err());
        assert!(check_compatible(std::iter::empty::<(&Path, StreamInfo)>(), true).is_err());
    }
}
