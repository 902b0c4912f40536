// kmerset: bounded-memory sorting and set algebra over k-mer containers
//
// Encodes k-mers (k <= 32) as 2-bit packed integers, persists them in a
// small binary container, and sorts, merges and combines containers that do
// not fit in memory.

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod constants;
pub mod container;
pub mod encoding;
pub mod error;
pub mod kmer;
pub mod parse;
pub mod record;
pub mod sequences;
pub mod setops;
pub mod sort;
pub mod taxonomy;

// Re-export common types at crate root
pub use container::{ContainerHeader, ContainerReader, ContainerWriter, Flags};
pub use encoding::EncodingError;
pub use error::{KmerSetError, Result};
pub use kmer::{KmerCode, KmerScanner};
pub use record::{Record, RecordSink, RecordSource, StreamInfo};
pub use setops::{run_set_operation, SetAlgebra, SetConfiguration, SetOperation, SetStrategy, StrategyChoice};
pub use sort::{merge_containers, sort_containers, split_containers, ExternalSorter, OutputPolicy, SortConfiguration, SortStats};
pub use taxonomy::{ParentTaxonomy, RootTaxonomy, Taxonomy};

/// Version information
pub fn version() -> (u8, u8, u8) {
    constants::VERSION
}
