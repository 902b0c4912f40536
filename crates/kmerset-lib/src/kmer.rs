//! K-mer codec: encode, decode, reverse complement and canonical form
//!
//! A k-mer of length `k <= 32` is packed into the low `2k` bits of a `u64`,
//! first base most significant. Free functions operate on raw codes with a
//! runtime `k` (containers carry k in their header); [`KmerCode`] bundles the
//! two for callers that want a typed value, and [`KmerScanner`] walks every
//! k-mer of a long sequence with O(1) work per position.

use std::fmt;
use std::str::FromStr;

use crate::constants::MAX_K;
use crate::encoding::{check_k, decode_base, encode_base, EncodingError};

const fn build_max_codes() -> [u64; MAX_K + 1] {
    let mut table = [0u64; MAX_K + 1];
    let mut k = 1;
    while k <= MAX_K {
        table[k] = if k == MAX_K {
            u64::MAX
        } else {
            (1u64 << (2 * k)) - 1
        };
        k += 1;
    }
    table
}

/// `4^k - 1` for every k in `[0, 32]` (entry 0 is unused)
pub const MAX_CODES: [u64; MAX_K + 1] = build_max_codes();

/// Largest valid code for a k-mer of length `k`
///
/// # Panics
/// Panics if `k > 32`.
#[inline]
pub const fn max_code(k: usize) -> u64 {
    MAX_CODES[k]
}

/// Number of bytes needed to store any code of a k-mer of length `k`
#[inline]
pub const fn compact_width(k: usize) -> usize {
    (2 * k).div_ceil(8)
}

/// Encode a k-length sequence over {A,C,G,T} (case-insensitive)
///
/// # Errors
/// Returns [`EncodingError::InvalidLength`] if the length is outside `[1, 32]`
/// and [`EncodingError::InvalidBase`] on any other character.
pub fn encode(seq: &[u8]) -> Result<u64, EncodingError> {
    check_k(seq.len())?;
    let mut code = 0u64;
    for &base in seq {
        code = (code << 2) | encode_base(base)? as u64;
    }
    Ok(code)
}

/// Append one 2-bit base to a code, dropping the oldest base
#[inline]
pub const fn push_base(code: u64, k: usize, bits: u8) -> u64 {
    ((code << 2) | bits as u64) & max_code(k)
}

/// Re-encode the window following `prev_window` in O(1)
///
/// `next_window` must be `prev_window` shifted by one base. The retiring
/// base's bits are shifted out, the new last base is shifted in and the
/// result is masked to `2k` bits.
///
/// # Errors
/// Returns an error if the windows differ in length, `k` is out of range or
/// the incoming base is invalid.
pub fn encode_following(
    prev_code: u64,
    prev_window: &[u8],
    next_window: &[u8],
) -> Result<u64, EncodingError> {
    let k = next_window.len();
    check_k(k)?;
    if prev_window.len() != k {
        return Err(EncodingError::LengthMismatch {
            expected: k,
            actual: prev_window.len(),
        });
    }
    debug_assert!(prev_window[1..].eq_ignore_ascii_case(&next_window[..k - 1]));
    let incoming = encode_base(next_window[k - 1])?;
    Ok(push_base(prev_code, k, incoming))
}

/// Reverse complement of a code
///
/// Uses bit-parallel operations: complement via NOT, then reverse 2-bit pairs.
#[inline]
pub const fn reverse_complement(code: u64, k: usize) -> u64 {
    let mut x = !code;
    // Swap adjacent 2-bit pairs, then nibbles, then bytes
    x = ((x >> 2) & 0x3333_3333_3333_3333) | ((x & 0x3333_3333_3333_3333) << 2);
    x = ((x >> 4) & 0x0F0F_0F0F_0F0F_0F0F) | ((x & 0x0F0F_0F0F_0F0F_0F0F) << 4);
    x = x.swap_bytes();
    // The k bases now sit in the top 2k bits
    x >> (64 - 2 * k)
}

/// Canonical representative: the smaller of a code and its reverse complement
#[inline]
pub const fn canonical(code: u64, k: usize) -> u64 {
    let rc = reverse_complement(code, k);
    if rc < code {
        rc
    } else {
        code
    }
}

/// Check that `code` fits in `2k` bits
///
/// # Errors
/// Returns [`EncodingError::CodeOverflow`] if `code >= 4^k`.
pub fn check_code(code: u64, k: usize) -> Result<(), EncodingError> {
    check_k(k)?;
    let max = max_code(k);
    if code > max {
        return Err(EncodingError::CodeOverflow { code, k, max });
    }
    Ok(())
}

/// Decode a code back to its k-mer string
///
/// # Errors
/// Returns [`EncodingError::CodeOverflow`] if `code >= 4^k`.
pub fn decode(code: u64, k: usize) -> Result<String, EncodingError> {
    check_code(code, k)?;
    let mut out = String::with_capacity(k);
    for i in (0..k).rev() {
        out.push(decode_base(((code >> (2 * i)) & 0b11) as u8) as char);
    }
    Ok(out)
}

/// A k-mer code together with its length
///
/// # Example
/// ```
/// use kmerset_lib::kmer::KmerCode;
///
/// let kmer: KmerCode = "ACGT".parse().unwrap();
/// assert_eq!(kmer.value(), 27);
/// assert_eq!(kmer.to_string(), "ACGT");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KmerCode {
    value: u64,
    k: u8,
}

impl KmerCode {
    /// Create a k-mer from a raw code, validating `value < 4^k`
    pub fn new(value: u64, k: usize) -> Result<Self, EncodingError> {
        check_code(value, k)?;
        Ok(Self { value, k: k as u8 })
    }

    /// Encode a sequence; its length becomes k
    pub fn from_bytes(seq: &[u8]) -> Result<Self, EncodingError> {
        let value = encode(seq)?;
        Ok(Self {
            value,
            k: seq.len() as u8,
        })
    }

    /// The raw code
    #[inline]
    pub fn value(&self) -> u64 {
        self.value
    }

    /// The k-mer length
    #[inline]
    pub fn k(&self) -> usize {
        self.k as usize
    }

    /// The reverse complement of this k-mer
    pub fn reverse_complement(&self) -> Self {
        Self {
            value: reverse_complement(self.value, self.k()),
            k: self.k,
        }
    }

    /// The canonical form of this k-mer
    pub fn canonical(&self) -> Self {
        Self {
            value: canonical(self.value, self.k()),
            k: self.k,
        }
    }

    /// Whether this k-mer is already its own canonical form
    pub fn is_canonical(&self) -> bool {
        self.canonical().value == self.value
    }
}

impl fmt::Display for KmerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in (0..self.k()).rev() {
            let bits = ((self.value >> (2 * i)) & 0b11) as u8;
            write!(f, "{}", decode_base(bits) as char)?;
        }
        Ok(())
    }
}

impl FromStr for KmerCode {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes())
    }
}

/// Iterator over the codes of every k-mer in a sequence
///
/// Consecutive windows are re-encoded with [`encode_following`]. A byte that
/// is not A/C/G/T resets the window, so no k-mer spanning it is produced.
pub struct KmerScanner<'a> {
    seq: &'a [u8],
    k: usize,
    canonical: bool,
    start: usize,
    prev: Option<u64>,
}

impl<'a> KmerScanner<'a> {
    /// Scan `seq` for k-mers of length `k`
    pub fn new(seq: &'a [u8], k: usize, canonical: bool) -> Result<Self, EncodingError> {
        check_k(k)?;
        Ok(Self {
            seq,
            k,
            canonical,
            start: 0,
            prev: None,
        })
    }
}

impl Iterator for KmerScanner<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            let end = self.start + self.k;
            if end > self.seq.len() {
                return None;
            }
            let window = &self.seq[self.start..end];
            let encoded = match self.prev {
                Some(prev) => encode_following(prev, &self.seq[self.start - 1..end - 1], window),
                None => encode(window),
            };
            match encoded {
                Ok(code) => {
                    self.prev = Some(code);
                    self.start += 1;
                    return Some(if self.canonical {
                        canonical(code, self.k)
                    } else {
                        code
                    });
                }
                Err(_) => {
                    let bad = window
                        .iter()
                        .rposition(|&b| encode_base(b).is_err())
                        .unwrap_or(0);
                    self.start += bad + 1;
                    self.prev = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_acgt() {
        assert_eq!(encode(b"ACGT").unwrap(), 27);
        assert_eq!(encode(b"acgt").unwrap(), 27);
        assert_eq!(decode(27, 4).unwrap(), "ACGT");
    }

    #[test]
    fn test_encode_invalid() {
        assert_eq!(encode(b"ACNT"), Err(EncodingError::InvalidBase(b'N')));
        assert_eq!(encode(b""), Err(EncodingError::InvalidLength(0)));
        let long = [b'A'; 33];
        assert_eq!(encode(&long), Err(EncodingError::InvalidLength(33)));
    }

    #[test]
    fn test_max_codes() {
        assert_eq!(max_code(1), 3);
        assert_eq!(max_code(4), 255);
        assert_eq!(max_code(31), (1u64 << 62) - 1);
        assert_eq!(max_code(32), u64::MAX);
        assert_eq!(encode(&[b'T'; 32]).unwrap(), u64::MAX);
    }

    #[test]
    fn test_compact_width() {
        assert_eq!(compact_width(1), 1);
        assert_eq!(compact_width(4), 1);
        assert_eq!(compact_width(5), 2);
        assert_eq!(compact_width(21), 6);
        assert_eq!(compact_width(32), 8);
    }

    #[test]
    fn test_decode_overflow() {
        assert_eq!(
            decode(256, 4),
            Err(EncodingError::CodeOverflow { code: 256, k: 4, max: 255 })
        );
        assert!(decode(255, 4).is_ok());
    }

    #[test]
    fn test_reverse_complement() {
        let code = encode(b"ACGTG").unwrap();
        assert_eq!(decode(reverse_complement(code, 5), 5).unwrap(), "CACGT");

        let code = encode(b"ACGTACG").unwrap();
        assert_eq!(decode(reverse_complement(code, 7), 7).unwrap(), "CGTACGT");

        let code = encode(b"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAC").unwrap();
        assert_eq!(
            decode(reverse_complement(code, 32), 32).unwrap(),
            "GTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTT"
        );

        assert_eq!(decode(reverse_complement(encode(b"A").unwrap(), 1), 1).unwrap(), "T");
    }

    #[test]
    fn test_canonical() {
        // ACGT is its own reverse complement
        assert_eq!(canonical(27, 4), 27);

        let fwd = encode(b"TTTG").unwrap();
        let rc = encode(b"CAAA").unwrap();
        assert_eq!(canonical(fwd, 4), rc);
        assert_eq!(canonical(rc, 4), rc);
    }

    #[test]
    fn test_encode_following() {
        let seq = b"ACGTTGCA";
        let k = 4;
        let mut code = encode(&seq[0..k]).unwrap();
        for i in 1..=seq.len() - k {
            code = encode_following(code, &seq[i - 1..i - 1 + k], &seq[i..i + k]).unwrap();
            assert_eq!(code, encode(&seq[i..i + k]).unwrap());
        }
    }

    #[test]
    fn test_encode_following_errors() {
        let code = encode(b"ACGT").unwrap();
        assert_eq!(
            encode_following(code, b"ACGT", b"CGTN"),
            Err(EncodingError::InvalidBase(b'N'))
        );
        assert!(encode_following(code, b"ACG", b"CGTA").is_err());
    }

    #[test]
    fn test_kmer_code() {
        let kmer = KmerCode::from_bytes(b"TTTG").unwrap();
        assert_eq!(kmer.k(), 4);
        assert_eq!(kmer.to_string(), "TTTG");
        assert_eq!(kmer.reverse_complement().to_string(), "CAAA");
        assert_eq!(kmer.canonical().to_string(), "CAAA");
        assert!(!kmer.is_canonical());
        assert!(kmer.canonical().is_canonical());

        assert!(KmerCode::new(256, 4).is_err());
        assert_eq!(KmerCode::new(27, 4).unwrap().to_string(), "ACGT");
    }

    #[test]
    fn test_scanner() {
        let codes: Vec<u64> = KmerScanner::new(b"ACGTAC", 4, false).unwrap().collect();
        assert_eq!(
            codes,
            vec![
                encode(b"ACGT").unwrap(),
                encode(b"CGTA").unwrap(),
                encode(b"GTAC").unwrap()
            ]
        );
    }

    #[test]
    fn test_scanner_skips_invalid_bases() {
        let codes: Vec<u64> = KmerScanner::new(b"ACGNACGTN", 3, false).unwrap().collect();
        assert_eq!(codes, vec![encode(b"ACG").unwrap(), encode(b"ACG").unwrap(), encode(b"CGT").unwrap()]);

        let none: Vec<u64> = KmerScanner::new(b"ACNNAC", 3, false).unwrap().collect();
        assert!(none.is_empty());
    }

    #[test]
    fn test_scanner_canonical() {
        let codes: Vec<u64> = KmerScanner::new(b"TTTG", 4, true).unwrap().collect();
        assert_eq!(codes, vec![encode(b"CAAA").unwrap()]);
    }
}
