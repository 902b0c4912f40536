//! Set algebra over record streams
//!
//! Every operation treats its inputs as sets of codes and writes one record
//! per surviving code. Whenever records for the same code are combined their
//! taxids are folded with LCA; for `difference` only the first input's taxids
//! count.
//!
//! Two interchangeable strategies implement [`SetStrategy`]:
//! [`SortedMerge`] streams sorted inputs through a k-way merge, [`HashJoin`]
//! works on arbitrary order in memory. One of them is picked per call.

pub mod config;
pub mod hash_join;
pub mod sorted_merge;

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::info;

pub use config::{SetConfiguration, StrategyChoice};
pub use hash_join::HashJoin;
pub use sorted_merge::SortedMerge;

use crate::container::{check_compatible, create_container, open_container, ContainerHeader, ContainerReader};
use crate::error::{KmerSetError, Result};
use crate::record::{RecordSink, RecordSource, StreamInfo};
use crate::taxonomy::Taxonomy;

/// One named input of a set operation
pub struct SetInput<'a> {
    /// Name used in error messages
    pub name: PathBuf,
    /// Schema of the stream
    pub info: StreamInfo,
    /// The records
    pub source: Box<dyn RecordSource + 'a>,
}

impl<'a> SetInput<'a> {
    /// Wrap a record source
    pub fn new(name: impl Into<PathBuf>, info: StreamInfo, source: impl RecordSource + 'a) -> Self {
        Self {
            name: name.into(),
            info,
            source: Box::new(source),
        }
    }
}

impl SetInput<'static> {
    /// Wrap an open container
    pub fn from_container(reader: ContainerReader<File>) -> Self {
        SetInput {
            name: reader.path().to_path_buf(),
            info: reader.stream_info(),
            source: Box::new(reader),
        }
    }
}

/// A set operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperation {
    /// Codes present in any input
    Union,
    /// Codes present in every input
    Intersection,
    /// Codes of the first input absent from all others
    Difference,
    /// Codes present in at least two inputs
    Repeated,
    /// Codes present in exactly one input
    Unique,
}

impl fmt::Display for SetOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SetOperation::Union => "union",
            SetOperation::Intersection => "intersection",
            SetOperation::Difference => "difference",
            SetOperation::Repeated => "repeated",
            SetOperation::Unique => "unique",
        })
    }
}

/// A join algorithm implementing every set operation
///
/// Each method consumes the inputs, writes to `sink` and returns the number
/// of records written.
pub trait SetStrategy {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Whether the output is sorted by code
    fn output_sorted(&self) -> bool;

    /// Codes present in any input
    fn union(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<u64>;

    /// Codes present in every input
    fn intersection(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<u64>;

    /// Codes of the first input absent from all others
    fn difference(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<u64>;

    /// Codes present in at least two distinct inputs
    fn repeated(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<u64>;

    /// Codes present in exactly one input
    fn unique(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<u64>;
}

/// Run `op` with a given strategy
pub fn execute(
    op: SetOperation,
    strategy: &dyn SetStrategy,
    inputs: Vec<SetInput<'_>>,
    sink: &mut dyn RecordSink,
) -> Result<u64> {
    match op {
        SetOperation::Union => strategy.union(inputs, sink),
        SetOperation::Intersection => strategy.intersection(inputs, sink),
        SetOperation::Difference => strategy.difference(inputs, sink),
        SetOperation::Repeated => strategy.repeated(inputs, sink),
        SetOperation::Unique => strategy.unique(inputs, sink),
    }
}

/// Result summary of a set operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOutcome {
    /// Records written
    pub records: u64,
    /// Whether the output is sorted by code
    pub sorted: bool,
    /// Strategy that ran
    pub strategy: &'static str,
}

/// Set-algebra engine: compatibility checks plus strategy selection
pub struct SetAlgebra<'t> {
    config: SetConfiguration,
    taxonomy: &'t dyn Taxonomy,
}

impl<'t> SetAlgebra<'t> {
    /// Create an engine
    pub fn new(config: SetConfiguration, taxonomy: &'t dyn Taxonomy) -> Self {
        Self { config, taxonomy }
    }

    /// The active configuration
    pub fn config(&self) -> &SetConfiguration {
        &self.config
    }

    /// Check the inputs and pick the strategy for them
    ///
    /// Returns the combined input schema and the strategy. `Auto` picks the
    /// sorted merge iff every input is sorted.
    pub fn prepare(&self, inputs: &[SetInput<'_>]) -> Result<(StreamInfo, Box<dyn SetStrategy + 't>)> {
        let info = check_compatible(inputs.iter().map(|i| (i.name.as_path(), i.info)), self.config.mixed_taxid)?;
        let use_merge = match self.config.strategy {
            StrategyChoice::Auto => info.sorted,
            StrategyChoice::Hash => false,
            StrategyChoice::Merge => {
                if let Some(unsorted) = inputs.iter().find(|i| !i.info.sorted) {
                    return Err(KmerSetError::IncompatibleInputs {
                        path: unsorted.name.clone(),
                        reason: "the merge strategy requires sorted inputs".to_string(),
                    });
                }
                true
            }
        };
        let strategy: Box<dyn SetStrategy + 't> = if use_merge {
            Box::new(SortedMerge::new(self.taxonomy))
        } else {
            Box::new(HashJoin::new(self.taxonomy, self.config.sort_output))
        };
        Ok((info, strategy))
    }

    /// Check, pick a strategy and run `op`
    pub fn run(&self, op: SetOperation, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<SetOutcome> {
        let (_, strategy) = self.prepare(&inputs)?;
        let records = execute(op, &*strategy, inputs, sink)?;
        Ok(SetOutcome {
            records,
            sorted: strategy.output_sorted(),
            strategy: strategy.name(),
        })
    }
}

/// Run a set operation over container files, writing a new container
///
/// The output header carries the Sorted flag iff the chosen strategy
/// produces sorted output, and per-record taxids iff any input has taxid
/// information.
pub fn run_set_operation<P: AsRef<Path>>(
    op: SetOperation,
    inputs: &[P],
    output: &Path,
    config: &SetConfiguration,
    taxonomy: &dyn Taxonomy,
) -> Result<SetOutcome> {
    config.print();
    let inputs: Vec<SetInput<'static>> = inputs
        .iter()
        .map(|p| open_container(p).map(SetInput::from_container))
        .collect::<Result<_>>()?;

    let algebra = SetAlgebra::new(config.clone(), taxonomy);
    let (info, strategy) = algebra.prepare(&inputs)?;
    let out_info = StreamInfo {
        sorted: strategy.output_sorted(),
        ..info
    };
    // Folding can reach any ancestor, so taxids get the full width
    let header = ContainerHeader::for_stream(&out_info, config.compact).with_max_taxid(u32::MAX);

    info!("Running {} over {} inputs with the {} strategy", op, inputs.len(), strategy.name());
    let mut writer = create_container(output, header)?;
    let records = execute(op, &*strategy, inputs, &mut writer)?;
    writer.finish_seekable()?;
    info!("Wrote {} records to {}", records, output.display());

    Ok(SetOutcome {
        records,
        sorted: out_info.sorted,
        strategy: strategy.name(),
    })
}
