//! RAM-bounded external sorting of record streams
//!
//! 1. Records are accumulated into a buffer of `chunk_elements` records
//! 2. A full buffer is handed to a worker which sorts it in parallel, applies
//!    a non-final policy pass and flushes it to a chunk container
//! 3. Once every worker has finished, the chunks are k-way merged; if there
//!    are more chunks than `max_open_files`, batches are first merged into
//!    intermediate chunks until the remainder fits
//!
//! Input that fits into a single buffer never touches the disk.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::thread::ScopedJoinHandle;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, warn};

use crate::container::{create_container, open_container, ContainerHeader, ContainerReader};
use crate::error::{KmerSetError, Result};
use crate::record::{CountingSink, Record, RecordSink, RecordSource, StreamInfo};
use crate::sort::config::SortConfiguration;
use crate::sort::merge::merge_sorted;
use crate::sort::policy::{apply_policy, OutputPolicy};
use crate::sort::workspace::TempWorkspace;
use crate::taxonomy::Taxonomy;

/// Counters from one sort, split or merge
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SortStats {
    /// Records read from the input
    pub records_in: u64,
    /// Records written to the sink
    pub records_out: u64,
    /// Chunk files written by the split phase
    pub chunks: usize,
    /// Merge passes, the final one included
    pub merge_rounds: usize,
    /// Temp files or directories that could not be removed
    pub cleanup_failures: usize,
}

/// Split-phase result: flushed chunks plus whatever is still buffered
struct SplitOutput {
    chunks: Vec<PathBuf>,
    rest: Vec<Record>,
}

/// External sorter for record streams
///
/// Manages RAM-bounded sorting with chunk spillover and k-way merge.
pub struct ExternalSorter<'t> {
    config: SortConfiguration,
    taxonomy: &'t dyn Taxonomy,
    pool: ThreadPool,
}

impl<'t> ExternalSorter<'t> {
    /// Create a sorter; fails on an invalid configuration
    pub fn new(config: SortConfiguration, taxonomy: &'t dyn Taxonomy) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_threads())
            .build()
            .map_err(|e| KmerSetError::InvalidConfiguration(format!("cannot build sort thread pool: {e}")))?;
        Ok(Self {
            config,
            taxonomy,
            pool,
        })
    }

    /// The active configuration
    pub fn config(&self) -> &SortConfiguration {
        &self.config
    }

    /// Sort `source` into `sink` under the configured policy
    ///
    /// `info` describes the input stream and determines the chunk format.
    pub fn sort<S: RecordSource>(&self, source: S, info: &StreamInfo, sink: &mut dyn RecordSink) -> Result<SortStats> {
        let mut stats = SortStats::default();

        if self.config.chunk_elements == 0 {
            let records = self.read_all(source, &mut stats)?;
            self.emit_in_memory(records, sink, &mut stats)?;
            return Ok(stats);
        }

        let mut workspace = TempWorkspace::create(&self.config.tmp_dir, self.config.keep_temp)?;
        let mut split = self.split_into(source, info, &mut || workspace.next_chunk_path(), &mut stats)?;

        if split.chunks.is_empty() {
            debug!("Input fits in one buffer, sorting in memory");
            self.emit_in_memory(split.rest, sink, &mut stats)?;
        } else {
            if !split.rest.is_empty() {
                let path = workspace.next_chunk_path();
                let header = self.chunk_header(info);
                write_chunk(&self.pool, split.rest, header, self.config.policy, self.taxonomy, path.clone())?;
                split.chunks.push(path);
                stats.chunks += 1;
            }
            info!("Merging {} chunks...", split.chunks.len());
            stats.records_out = self.merge_rounds(split.chunks, true, &workspace, info, sink, &mut stats)?;
        }

        stats.cleanup_failures += workspace.cleanup();
        info!(
            "Sort complete: {} records in, {} records out, {} chunks, {} merge rounds",
            stats.records_in, stats.records_out, stats.chunks, stats.merge_rounds
        );
        Ok(stats)
    }

    /// Run only the split phase, writing sorted chunks into `out_dir`
    ///
    /// The chunks belong to the caller; every record lands in some chunk.
    pub fn split<S: RecordSource>(&self, source: S, info: &StreamInfo, out_dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(out_dir).map_err(|e| KmerSetError::io(out_dir, "create output directory", e))?;
        let mut next_id = 0usize;
        let mut next_path = || {
            let path = out_dir.join(format!("chunk_{next_id:06}.kms"));
            next_id += 1;
            path
        };

        let mut stats = SortStats::default();
        let budget_split = if self.config.chunk_elements == 0 {
            SplitOutput {
                chunks: Vec::new(),
                rest: self.read_all(source, &mut stats)?,
            }
        } else {
            self.split_into(source, info, &mut next_path, &mut stats)?
        };

        let SplitOutput { mut chunks, rest } = budget_split;
        if !rest.is_empty() {
            let path = next_path();
            write_chunk(&self.pool, rest, self.chunk_header(info), self.config.policy, self.taxonomy, path.clone())?;
            chunks.push(path);
        }
        info!("Split {} records into {} chunks", stats.records_in, chunks.len());
        Ok(chunks)
    }

    /// K-way merge sorted containers into `sink`
    ///
    /// The inputs are left in place. More than `max_open_files` inputs are
    /// reduced through intermediate chunks in a private temp directory.
    pub fn merge_files<P: AsRef<Path>>(&self, paths: &[P], sink: &mut dyn RecordSink) -> Result<SortStats> {
        let (info, _) = self.check_merge_inputs(paths)?;
        self.merge_checked(paths, &info, sink)
    }

    /// Check that merge inputs are sorted and compatible
    ///
    /// Reads each header once and returns the combined schema together with
    /// the largest taxid bound among the inputs.
    pub fn check_merge_inputs<P: AsRef<Path>>(&self, paths: &[P]) -> Result<(StreamInfo, u32)> {
        let mut infos = Vec::with_capacity(paths.len());
        let mut bound = 0;
        for path in paths {
            let path = path.as_ref();
            let header = crate::container::read_header(path)?;
            if !header.is_sorted() {
                return Err(KmerSetError::IncompatibleInputs {
                    path: path.to_path_buf(),
                    reason: "input is not sorted".to_string(),
                });
            }
            bound = bound.max(header.taxid_bound());
            infos.push(header.stream_info());
        }
        let info = crate::container::check_compatible(
            paths.iter().map(|p| p.as_ref()).zip(infos),
            self.config.mixed_taxid,
        )?;
        Ok((info, bound))
    }

    /// Merge inputs already accepted by [`check_merge_inputs`](Self::check_merge_inputs)
    pub fn merge_checked<P: AsRef<Path>>(
        &self,
        paths: &[P],
        info: &StreamInfo,
        sink: &mut dyn RecordSink,
    ) -> Result<SortStats> {
        let mut stats = SortStats::default();
        let inputs: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        let mut workspace = TempWorkspace::create(&self.config.tmp_dir, self.config.keep_temp)?;
        stats.records_out = self.merge_rounds(inputs, false, &workspace, info, sink, &mut stats)?;
        stats.cleanup_failures += workspace.cleanup();
        info!("Merge complete: {} records out, {} rounds", stats.records_out, stats.merge_rounds);
        Ok(stats)
    }

    fn chunk_header(&self, info: &StreamInfo) -> ContainerHeader {
        let sorted = StreamInfo { sorted: true, ..*info };
        ContainerHeader::for_stream(&sorted, true)
    }

    fn read_all<S: RecordSource>(&self, mut source: S, stats: &mut SortStats) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = source.next_record()? {
            records.push(record);
        }
        stats.records_in = records.len() as u64;
        Ok(records)
    }

    fn emit_in_memory(&self, mut records: Vec<Record>, sink: &mut dyn RecordSink, stats: &mut SortStats) -> Result<()> {
        self.pool.install(|| records.par_sort_unstable_by_key(|r| r.code));
        let mut out = CountingSink::new(sink);
        apply_policy(&records, self.config.policy, true, self.taxonomy, &mut out)?;
        stats.records_out = out.count();
        Ok(())
    }

    /// Accumulate buffers and hand full ones to a bounded set of workers
    ///
    /// A buffer is only flushed once one more record arrives, so input of
    /// exactly one buffer stays in memory. The first error stops reading;
    /// in-flight workers are joined before it is returned.
    fn split_into<S: RecordSource>(
        &self,
        mut source: S,
        info: &StreamInfo,
        next_path: &mut dyn FnMut() -> PathBuf,
        stats: &mut SortStats,
    ) -> Result<SplitOutput> {
        let budget = self.config.chunk_elements;
        let workers = self.config.effective_threads().max(1);
        let header = self.chunk_header(info);
        let policy = self.config.policy;
        let taxonomy = self.taxonomy;
        let pool = &self.pool;

        let mut chunks = Vec::new();
        let mut buffer: Vec<Record> = Vec::with_capacity(budget.min(1 << 20));
        let mut records_in = 0u64;

        let result = std::thread::scope(|scope| -> Result<()> {
            let mut in_flight: VecDeque<ScopedJoinHandle<'_, Result<PathBuf>>> = VecDeque::new();
            let mut first_err = None;

            loop {
                let record = match source.next_record() {
                    Ok(Some(record)) => record,
                    Ok(None) => break,
                    Err(e) => {
                        first_err = Some(e);
                        break;
                    }
                };
                if buffer.len() >= budget {
                    if in_flight.len() >= workers {
                        if let Some(handle) = in_flight.pop_front() {
                            match join_chunk(handle) {
                                Ok(path) => chunks.push(path),
                                Err(e) => {
                                    first_err = Some(e);
                                    break;
                                }
                            }
                        }
                    }
                    let full = std::mem::replace(&mut buffer, Vec::with_capacity(budget.min(1 << 20)));
                    let path = next_path();
                    let header = header.clone();
                    debug!("Spilling {} records to {}", full.len(), path.display());
                    in_flight.push_back(scope.spawn(move || write_chunk(pool, full, header, policy, taxonomy, path)));
                }
                buffer.push(record);
                records_in += 1;
            }

            // Barrier: every chunk is complete before the merge opens them
            for handle in in_flight {
                match join_chunk(handle) {
                    Ok(path) => chunks.push(path),
                    Err(e) => {
                        first_err.get_or_insert(e);
                    }
                }
            }
            match first_err {
                Some(e) => Err(e),
                None => Ok(()),
            }
        });

        stats.records_in = records_in;
        stats.chunks = chunks.len();
        result?;
        Ok(SplitOutput { chunks, rest: buffer })
    }

    /// Merge chunk files down to one final pass into `sink`
    ///
    /// Inputs of an intermediate round are deleted after use only when
    /// `owned`; intermediate chunks are always owned. Whatever is left in the
    /// workspace goes with its cleanup.
    fn merge_rounds(
        &self,
        mut chunks: Vec<PathBuf>,
        mut owned: bool,
        workspace: &TempWorkspace,
        info: &StreamInfo,
        sink: &mut dyn RecordSink,
        stats: &mut SortStats,
    ) -> Result<u64> {
        let max_open = self.config.max_open_files;
        let policy = self.config.policy;

        while chunks.len() > max_open {
            stats.merge_rounds += 1;
            info!(
                "Merge round {}: {} chunks exceed the limit of {} open files",
                stats.merge_rounds,
                chunks.len(),
                max_open
            );
            let mut next = Vec::with_capacity(chunks.len().div_ceil(max_open));
            for batch in chunks.chunks(max_open) {
                let path = workspace.next_chunk_path();
                let mut readers = open_all(batch)?;
                let bound = readers.iter().map(|r| r.header().taxid_bound()).max().unwrap_or(0);
                let header = self.chunk_header(info).with_max_taxid(folded_taxid_bound(policy, bound));
                let mut writer = create_container(&path, header)?;
                merge_sorted(&mut readers, policy, false, self.taxonomy, &mut writer)?;
                writer.finish_seekable()?;
                drop(readers);
                if owned && !workspace.keeps_files() {
                    for consumed in batch {
                        stats.cleanup_failures += remove_chunk(consumed);
                    }
                }
                next.push(path);
            }
            chunks = next;
            owned = true;
        }

        stats.merge_rounds += 1;
        let mut readers = open_all(&chunks)?;
        merge_sorted(&mut readers, policy, true, self.taxonomy, sink)
    }
}

/// Sort a buffer, apply a non-final policy pass and flush it to `path`
fn write_chunk(
    pool: &ThreadPool,
    mut records: Vec<Record>,
    header: ContainerHeader,
    policy: OutputPolicy,
    taxonomy: &dyn Taxonomy,
    path: PathBuf,
) -> Result<PathBuf> {
    pool.install(|| records.par_sort_unstable_by_key(|r| r.code));
    let header = if header.has_taxid_info() {
        let bound = records.iter().map(|r| r.taxid).max().unwrap_or(0);
        header.with_max_taxid(folded_taxid_bound(policy, bound))
    } else {
        header
    };
    let mut writer = create_container(&path, header)?;
    apply_policy(&records, policy, false, taxonomy, &mut writer)?;
    let written = writer.records_written();
    writer.finish_seekable()?;
    debug!("Flushed {} of {} records to {}", written, records.len(), path.display());
    Ok(path)
}

fn join_chunk(handle: ScopedJoinHandle<'_, Result<PathBuf>>) -> Result<PathBuf> {
    handle.join().map_err(|_| KmerSetError::WorkerPanicked)?
}

fn open_all(paths: &[PathBuf]) -> Result<Vec<ContainerReader<File>>> {
    paths.iter().map(open_container).collect()
}

fn remove_chunk(path: &Path) -> usize {
    match fs::remove_file(path) {
        Ok(()) => 0,
        Err(e) => {
            warn!("Failed to remove chunk {}: {}", path.display(), e);
            1
        }
    }
}

/// Largest taxid a pass under `policy` can emit
///
/// Folding may produce an ancestor whose id exceeds every input taxid, so
/// folding policies fall back to the full 32-bit range.
pub(crate) fn folded_taxid_bound(policy: OutputPolicy, input_bound: u32) -> u32 {
    match policy {
        OutputPolicy::All => input_bound,
        OutputPolicy::Unique | OutputPolicy::RepeatedOnly => u32::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemorySource;
    use crate::taxonomy::RootTaxonomy;
    use tempfile::TempDir;

    fn config(tmp: &Path, chunk_elements: usize, policy: OutputPolicy) -> SortConfiguration {
        SortConfiguration {
            chunk_elements,
            num_threads: 2,
            policy,
            ..SortConfiguration::default()
        }
        .with_tmp_dir(tmp)
    }

    fn sort_codes(codes: &[u64], cfg: SortConfiguration) -> (Vec<u64>, SortStats) {
        let sorter = ExternalSorter::new(cfg, &RootTaxonomy).unwrap();
        let mut out: Vec<Record> = Vec::new();
        let stats = sorter
            .sort(MemorySource::from_codes(codes), &StreamInfo::kmers(4), &mut out)
            .unwrap();
        (out.into_iter().map(|r| r.code).collect(), stats)
    }

    #[test]
    fn test_sort_two_chunks() {
        let tmp = TempDir::new().unwrap();
        let input = [5, 3, 3, 1];
        let (all, stats) = sort_codes(&input, config(tmp.path(), 2, OutputPolicy::All));
        assert_eq!(all, vec![1, 3, 3, 5]);
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.records_in, 4);
        assert_eq!(stats.records_out, 4);

        let (unique, _) = sort_codes(&input, config(tmp.path(), 2, OutputPolicy::Unique));
        assert_eq!(unique, vec![1, 3, 5]);
        let (repeated, _) = sort_codes(&input, config(tmp.path(), 2, OutputPolicy::RepeatedOnly));
        assert_eq!(repeated, vec![3]);

        // Temp directories are gone
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_single_buffer_stays_in_memory() {
        let tmp = TempDir::new().unwrap();
        let (out, stats) = sort_codes(&[9, 2, 7], config(tmp.path(), 3, OutputPolicy::All));
        assert_eq!(out, vec![2, 7, 9]);
        assert_eq!(stats.chunks, 0);
        assert_eq!(stats.merge_rounds, 0);
    }

    #[test]
    fn test_zero_budget_is_in_memory() {
        let tmp = TempDir::new().unwrap();
        let (out, stats) = sort_codes(&[4, 4, 1], config(tmp.path(), 0, OutputPolicy::Unique));
        assert_eq!(out, vec![1, 4]);
        assert_eq!(stats.chunks, 0);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_input() {
        let tmp = TempDir::new().unwrap();
        let (out, stats) = sort_codes(&[], config(tmp.path(), 2, OutputPolicy::All));
        assert!(out.is_empty());
        assert_eq!(stats, SortStats::default());
    }

    #[test]
    fn test_multi_pass_merge() {
        let tmp = TempDir::new().unwrap();
        let input: Vec<u64> = (0..200u64).map(|i| (i * 37) % 101).collect();
        let mut expected = input.clone();
        expected.sort_unstable();

        let cfg = SortConfiguration {
            max_open_files: 2,
            ..config(tmp.path(), 7, OutputPolicy::All)
        };
        let (out, stats) = sort_codes(&input, cfg);
        assert_eq!(out, expected);
        assert!(stats.merge_rounds > 1);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_keep_temp() {
        let tmp = TempDir::new().unwrap();
        let cfg = SortConfiguration {
            keep_temp: true,
            ..config(tmp.path(), 2, OutputPolicy::All)
        };
        let (out, _) = sort_codes(&[3, 2, 1, 0], cfg);
        assert_eq!(out, vec![0, 1, 2, 3]);
        let runs: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(runs.len(), 1);
    }

    #[test]
    fn test_split_writes_caller_chunks() {
        let tmp = TempDir::new().unwrap();
        let out_dir = tmp.path().join("chunks");
        let sorter = ExternalSorter::new(config(tmp.path(), 2, OutputPolicy::All), &RootTaxonomy).unwrap();
        let chunks = sorter
            .split(MemorySource::from_codes(&[5, 3, 3, 1, 8]), &StreamInfo::kmers(4), &out_dir)
            .unwrap();
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.starts_with(&out_dir));
            assert!(crate::container::read_header(chunk).unwrap().is_sorted());
        }

        let mut merged: Vec<Record> = Vec::new();
        let stats = sorter.merge_files(&chunks, &mut merged).unwrap();
        assert_eq!(stats.records_out, 5);
        let codes: Vec<u64> = merged.iter().map(|r| r.code).collect();
        assert_eq!(codes, vec![1, 3, 3, 5, 8]);
        // Caller-owned inputs survive the merge
        assert!(chunks.iter().all(|c| c.exists()));
    }

    #[test]
    fn test_merge_files_rejects_unsorted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("unsorted.kms");
        let mut writer = create_container(&path, ContainerHeader::for_stream(&StreamInfo::kmers(4), true)).unwrap();
        writer.write_record(Record::plain(1)).unwrap();
        writer.finish_seekable().unwrap();

        let sorter = ExternalSorter::new(config(tmp.path(), 2, OutputPolicy::All), &RootTaxonomy).unwrap();
        let err = sorter.merge_files(&[path], &mut Vec::<Record>::new()).unwrap_err();
        assert!(matches!(err, KmerSetError::IncompatibleInputs { .. }));
    }

    #[test]
    fn test_check_merge_inputs_combines_schema() {
        let tmp = TempDir::new().unwrap();
        let sorted = StreamInfo {
            sorted: true,
            ..StreamInfo::kmers(4)
        };
        let plain = tmp.path().join("plain.kms");
        let tagged = tmp.path().join("tagged.kms");
        let mut writer = create_container(&plain, ContainerHeader::for_stream(&sorted, true)).unwrap();
        writer.write_record(Record::plain(1)).unwrap();
        writer.finish_seekable().unwrap();
        let header = ContainerHeader::for_stream(&StreamInfo { has_taxid: true, ..sorted }, true).with_max_taxid(300);
        let mut writer = create_container(&tagged, header).unwrap();
        writer.write_record(Record::new(2, 300)).unwrap();
        writer.finish_seekable().unwrap();

        let mut cfg = config(tmp.path(), 2, OutputPolicy::All);
        cfg.mixed_taxid = true;
        let sorter = ExternalSorter::new(cfg, &RootTaxonomy).unwrap();
        let (info, bound) = sorter.check_merge_inputs(&[&plain, &tagged]).unwrap();
        assert!(info.sorted);
        assert!(info.has_taxid);
        assert_eq!(bound, 300);

        let mut merged: Vec<Record> = Vec::new();
        let stats = sorter.merge_checked(&[&plain, &tagged], &info, &mut merged).unwrap();
        assert_eq!(stats.records_out, 2);
        assert_eq!(merged, vec![Record::new(1, 0), Record::new(2, 300)]);
    }

    /// Source failing after a number of records
    struct Failing(u64);

    impl RecordSource for Failing {
        fn next_record(&mut self) -> Result<Option<Record>> {
            if self.0 == 0 {
                return Err(KmerSetError::Parse {
                    line: 1,
                    message: "boom".to_string(),
                });
            }
            self.0 -= 1;
            Ok(Some(Record::plain(self.0 % 16)))
        }
    }

    #[test]
    fn test_source_error_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let sorter = ExternalSorter::new(config(tmp.path(), 2, OutputPolicy::All), &RootTaxonomy).unwrap();
        let err = sorter
            .sort(Failing(9), &StreamInfo::kmers(4), &mut Vec::<Record>::new())
            .unwrap_err();
        assert!(matches!(err, KmerSetError::Parse { .. }));
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
