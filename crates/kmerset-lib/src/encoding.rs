//! DNA nucleotide encoding
//!
//! This module implements the 2-bit encoding scheme for DNA nucleotides.
//! Bases are packed big-endian (first base in the most significant bits):
//! - A (65/97)  -> 00
//! - C (67/99)  -> 01
//! - G (71/103) -> 10
//! - T (84/116) -> 11
//!
//! With this ordering the complement of a base is its bitwise NOT, and
//! numeric order of codes equals lexicographic order of the k-mers.

use thiserror::Error;

use crate::constants::{MAX_K, MIN_K};

/// Error type for encoding operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// The input byte is not a valid DNA base (A/C/G/T)
    #[error("Invalid DNA base: {:?}", base_char(.0))]
    InvalidBase(u8),
    /// The code does not fit in 2k bits
    #[error("Code {code} overflows a {k}-mer (max {max})")]
    CodeOverflow {
        /// Offending code
        code: u64,
        /// K-mer length
        k: usize,
        /// Largest valid code for this k
        max: u64,
    },
    /// K is outside the supported range
    #[error("Invalid k-mer length {0}: must be in [1, 32]")]
    InvalidLength(usize),
    /// The input string length does not match the expected k-mer length
    #[error("K-mer length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Expected k-mer length
        expected: usize,
        /// Actual string length
        actual: usize,
    },
}

fn base_char(base: &u8) -> char {
    *base as char
}

/// Encode a single DNA nucleotide to 2 bits
#[inline]
pub const fn encode_base(base: u8) -> Result<u8, EncodingError> {
    match base {
        b'A' | b'a' => Ok(0b00),
        b'C' | b'c' => Ok(0b01),
        b'G' | b'g' => Ok(0b10),
        b'T' | b't' => Ok(0b11),
        _ => Err(EncodingError::InvalidBase(base)),
    }
}

/// Decode a 2-bit value to DNA nucleotide (uppercase)
#[inline]
pub const fn decode_base(bits: u8) -> u8 {
    match bits & 0b11 {
        0b00 => b'A',
        0b01 => b'C',
        0b10 => b'G',
        _ => b'T',
    }
}

/// Get the complement of a DNA base (encoded)
#[inline]
pub const fn complement_base(bits: u8) -> u8 {
    // A(00) <-> T(11), C(01) <-> G(10)
    (bits ^ 0b11) & 0b11
}

/// Check that `k` is a supported k-mer length
#[inline]
pub const fn check_k(k: usize) -> Result<(), EncodingError> {
    if k < MIN_K || k > MAX_K {
        Err(EncodingError::InvalidLength(k))
    } else {
        Ok(())
    }
}
