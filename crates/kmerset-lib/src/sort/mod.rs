//! Bounded-memory external sort-merge engine
//!
//! [`ExternalSorter`] works on record streams; the `*_containers` functions
//! wrap it for container files, checking input compatibility and deriving the
//! output header.

pub mod config;
pub mod external_sort;
pub mod heap;
pub mod merge;
pub mod policy;
pub mod workspace;

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::info;

pub use config::SortConfiguration;
pub use external_sort::{ExternalSorter, SortStats};
pub use heap::{HeapItem, MergeHeap};
pub use merge::merge_sorted;
pub use policy::{apply_policy, OutputPolicy, PolicyFolder};
pub use workspace::TempWorkspace;

use crate::container::{check_compatible, create_container, open_container, ContainerHeader, ContainerReader};
use crate::error::Result;
use crate::record::{ChainSource, RecordSource, StreamInfo};
use crate::taxonomy::Taxonomy;
use external_sort::folded_taxid_bound;

/// Open every input and check that they can be combined
fn open_inputs<P: AsRef<Path>>(inputs: &[P], mixed_taxid: bool) -> Result<(Vec<ContainerReader<File>>, StreamInfo, u32)> {
    let readers: Vec<ContainerReader<File>> = inputs.iter().map(open_container).collect::<Result<_>>()?;
    let info = check_compatible(readers.iter().map(|r| (r.path(), r.stream_info())), mixed_taxid)?;
    let bound = readers.iter().map(|r| r.header().taxid_bound()).max().unwrap_or(0);
    Ok((readers, info, bound))
}

fn output_header(info: &StreamInfo, config: &SortConfiguration, taxid_bound: u32) -> ContainerHeader {
    let sorted = StreamInfo { sorted: true, ..*info };
    ContainerHeader::for_stream(&sorted, config.compact).with_max_taxid(folded_taxid_bound(config.policy, taxid_bound))
}

/// Sort one or more containers into a new sorted container
///
/// The inputs are read back to back; the output carries the Sorted flag and
/// per-record taxids iff any input has taxid information.
pub fn sort_containers<P: AsRef<Path>>(
    inputs: &[P],
    output: &Path,
    config: &SortConfiguration,
    taxonomy: &dyn Taxonomy,
) -> Result<SortStats> {
    config.print();
    let (readers, info, bound) = open_inputs(inputs, config.mixed_taxid)?;
    let header = output_header(&info, config, bound);

    let sorter = ExternalSorter::new(config.clone(), taxonomy)?;
    let source = ChainSource::new(
        readers
            .into_iter()
            .map(|r| Box::new(r) as Box<dyn RecordSource>)
            .collect(),
    );
    let mut writer = create_container(output, header)?;
    let stats = sorter.sort(source, &info, &mut writer)?;
    writer.finish_seekable()?;
    info!("Wrote {} records to {}", stats.records_out, output.display());
    Ok(stats)
}

/// Merge already sorted containers into a new sorted container
pub fn merge_containers<P: AsRef<Path>>(
    inputs: &[P],
    output: &Path,
    config: &SortConfiguration,
    taxonomy: &dyn Taxonomy,
) -> Result<SortStats> {
    config.print();
    let sorter = ExternalSorter::new(config.clone(), taxonomy)?;
    let (info, bound) = sorter.check_merge_inputs(inputs)?;
    let header = output_header(&info, config, bound);

    let mut writer = create_container(output, header)?;
    let stats = sorter.merge_checked(inputs, &info, &mut writer)?;
    writer.finish_seekable()?;
    info!("Wrote {} records to {}", stats.records_out, output.display());
    Ok(stats)
}

/// Split containers into sorted chunk containers inside `out_dir`
pub fn split_containers<P: AsRef<Path>>(
    inputs: &[P],
    out_dir: &Path,
    config: &SortConfiguration,
    taxonomy: &dyn Taxonomy,
) -> Result<Vec<PathBuf>> {
    config.print();
    let (readers, info, _) = open_inputs(inputs, config.mixed_taxid)?;
    let sorter = ExternalSorter::new(config.clone(), taxonomy)?;
    let source = ChainSource::new(
        readers
            .into_iter()
            .map(|r| Box::new(r) as Box<dyn RecordSource>)
            .collect(),
    );
    sorter.split(source, &info, out_dir)
}
