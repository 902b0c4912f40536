//! Plain-text k-mer lists
//!
//! One entry per line: `<token>[<whitespace><taxid>]`. A token made only of
//! decimal digits is a precomputed hash, anything else is a k-mer string.
//! Blank lines and lines starting with `#` are skipped.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::encoding::EncodingError;
use crate::error::{KmerSetError, Result};
use crate::kmer::{canonical as canonical_code, encode};
use crate::record::{Record, RecordSource, StreamInfo};

/// One parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// A k-mer string
    PlainKmer(String),
    /// A k-mer string followed by a taxid
    KmerWithTaxid(String, u32),
    /// A precomputed hash value
    Hash(u64),
    /// A hash value followed by a taxid
    HashWithTaxid(u64, u32),
}

impl ParsedLine {
    /// Whether the entry is a hash rather than a k-mer
    pub fn is_hash(&self) -> bool {
        matches!(self, ParsedLine::Hash(_) | ParsedLine::HashWithTaxid(..))
    }

    /// Taxid column, if present
    pub fn taxid(&self) -> Option<u32> {
        match self {
            ParsedLine::KmerWithTaxid(_, t) | ParsedLine::HashWithTaxid(_, t) => Some(*t),
            _ => None,
        }
    }

    /// Convert to a record; k-mers must be exactly `k` long
    pub fn to_record(&self, k: usize, canonical: bool) -> std::result::Result<Record, EncodingError> {
        let code = match self {
            ParsedLine::Hash(h) | ParsedLine::HashWithTaxid(h, _) => return Ok(Record::new(*h, self.taxid().unwrap_or(0))),
            ParsedLine::PlainKmer(s) | ParsedLine::KmerWithTaxid(s, _) => {
                if s.len() != k {
                    return Err(EncodingError::LengthMismatch {
                        expected: k,
                        actual: s.len(),
                    });
                }
                encode(s.as_bytes())?
            }
        };
        let code = if canonical { canonical_code(code, k) } else { code };
        Ok(Record::new(code, self.taxid().unwrap_or(0)))
    }
}

/// Parse a single line; `Ok(None)` for blank and comment lines
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<ParsedLine>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let mut fields = trimmed.split_whitespace();
    let token = match fields.next() {
        Some(t) => t,
        None => return Ok(None),
    };
    let taxid = match fields.next() {
        Some(field) => Some(field.parse::<u32>().map_err(|_| KmerSetError::Parse {
            line: line_no,
            message: format!("invalid taxid '{field}'"),
        })?),
        None => None,
    };
    if let Some(extra) = fields.next() {
        return Err(KmerSetError::Parse {
            line: line_no,
            message: format!("unexpected trailing field '{extra}'"),
        });
    }

    let parsed = if token.bytes().all(|b| b.is_ascii_digit()) {
        let hash = token.parse::<u64>().map_err(|_| KmerSetError::Parse {
            line: line_no,
            message: format!("hash value '{token}' does not fit in 64 bits"),
        })?;
        match taxid {
            Some(t) => ParsedLine::HashWithTaxid(hash, t),
            None => ParsedLine::Hash(hash),
        }
    } else {
        match taxid {
            Some(t) => ParsedLine::KmerWithTaxid(token.to_string(), t),
            None => ParsedLine::PlainKmer(token.to_string()),
        }
    };
    Ok(Some(parsed))
}

/// Iterator over the entries of a text list
pub struct LineParser<R: BufRead> {
    reader: R,
    buf: String,
    line_no: usize,
}

impl<R: BufRead> LineParser<R> {
    /// Wrap a buffered reader
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            line_no: 0,
        }
    }

    /// 1-based number of the line returned last
    pub fn line_number(&self) -> usize {
        self.line_no
    }
}

impl<R: BufRead> Iterator for LineParser<R> {
    type Item = Result<ParsedLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            self.line_no += 1;
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    return Some(Err(KmerSetError::Parse {
                        line: self.line_no,
                        message: e.to_string(),
                    }))
                }
            }
            match parse_line(&self.buf, self.line_no) {
                Ok(Some(parsed)) => return Some(Ok(parsed)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Record source over a text list
///
/// The first entry fixes the kind of the whole list: hashes and k-mers may
/// not be mixed, and a taxid column may only appear if the first entry has
/// one. Entries without a taxid get 0.
pub struct TextRecordSource<R: BufRead> {
    lines: LineParser<R>,
    name: PathBuf,
    k: usize,
    canonical: bool,
    hashed: bool,
    has_taxid: bool,
    peeked: Option<ParsedLine>,
}

impl<R: BufRead> TextRecordSource<R> {
    /// Open a text list of k-mers of length `k`
    pub fn new(reader: R, k: usize, canonical: bool, name: impl AsRef<Path>) -> Result<Self> {
        crate::encoding::check_k(k)?;
        let mut lines = LineParser::new(reader);
        let peeked = lines.next().transpose()?;
        let (hashed, has_taxid) = match &peeked {
            Some(first) => (first.is_hash(), first.taxid().is_some()),
            None => (false, false),
        };
        Ok(Self {
            lines,
            name: name.as_ref().to_path_buf(),
            k,
            canonical,
            hashed,
            has_taxid,
            peeked,
        })
    }

    /// Schema of the produced records
    pub fn stream_info(&self) -> StreamInfo {
        StreamInfo {
            k: self.k,
            canonical: self.canonical && !self.hashed,
            sorted: false,
            hashed: self.hashed,
            has_taxid: self.has_taxid,
        }
    }

    fn convert(&self, parsed: ParsedLine) -> Result<Record> {
        let line = self.lines.line_number();
        if parsed.is_hash() != self.hashed {
            return Err(KmerSetError::Parse {
                line,
                message: "hash values and k-mer strings cannot be mixed".to_string(),
            });
        }
        if parsed.taxid().is_some() && !self.has_taxid {
            return Err(KmerSetError::Parse {
                line,
                message: "taxid column appears after entries without one".to_string(),
            });
        }
        parsed
            .to_record(self.k, self.canonical)
            .map_err(|source| KmerSetError::InvalidEntry { line, source })
    }
}

impl<R: BufRead> RecordSource for TextRecordSource<R> {
    fn next_record(&mut self) -> Result<Option<Record>> {
        let parsed = match self.peeked.take() {
            Some(p) => p,
            None => match self.lines.next() {
                Some(p) => p?,
                None => return Ok(None),
            },
        };
        self.convert(parsed).map(Some)
    }

    fn name(&self) -> &Path {
        &self.name
    }
}
