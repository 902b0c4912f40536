//! K-way merge of sorted record streams

use crate::error::Result;
use crate::record::{ensure_sorted, CountingSink, Record, RecordSink, RecordSource};
use crate::sort::heap::MergeHeap;
use crate::sort::policy::{OutputPolicy, PolicyFolder};
use crate::taxonomy::Taxonomy;

/// Merge sorted sources into `sink`, applying `policy`
///
/// The heap holds one buffered record per open source, so its top is always
/// the smallest record not yet emitted. Returns the number of records
/// written.
///
/// # Errors
/// A source whose codes decrease fails with `IncompatibleInputs`.
pub fn merge_sorted<S: RecordSource>(
    sources: &mut [S],
    policy: OutputPolicy,
    final_pass: bool,
    taxonomy: &dyn Taxonomy,
    sink: &mut dyn RecordSink,
) -> Result<u64> {
    let mut heap = MergeHeap::with_capacity(sources.len());
    for (idx, source) in sources.iter_mut().enumerate() {
        if let Some(record) = source.next_record()? {
            heap.push(record.code, record.taxid, idx);
        }
    }

    let mut out = CountingSink::new(sink);
    let mut folder = PolicyFolder::new(policy, final_pass, taxonomy);
    while let Some(item) = heap.pop() {
        folder.push(Record::new(item.key, item.value), &mut out)?;

        let source = &mut sources[item.source];
        if let Some(next) = source.next_record()? {
            ensure_sorted(&*source, item.key, next.code)?;
            heap.push(next.code, next.taxid, item.source);
        }
    }
    folder.finish(&mut out)?;
    Ok(out.count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KmerSetError;
    use crate::record::MemorySource;
    use crate::taxonomy::RootTaxonomy;

    fn merge(runs: &[&[u64]], policy: OutputPolicy, final_pass: bool) -> Vec<u64> {
        let mut sources: Vec<MemorySource> = runs.iter().map(|r| MemorySource::from_codes(r)).collect();
        let mut out: Vec<Record> = Vec::new();
        let n = merge_sorted(&mut sources, policy, final_pass, &RootTaxonomy, &mut out).unwrap();
        assert_eq!(n as usize, out.len());
        out.into_iter().map(|r| r.code).collect()
    }

    #[test]
    fn test_merge_two_chunks() {
        let runs: &[&[u64]] = &[&[3, 5], &[1, 3]];
        assert_eq!(merge(runs, OutputPolicy::All, true), vec![1, 3, 3, 5]);
        assert_eq!(merge(runs, OutputPolicy::Unique, true), vec![1, 3, 5]);
        assert_eq!(merge(runs, OutputPolicy::RepeatedOnly, true), vec![3]);
    }

    #[test]
    fn test_merge_with_empty_sources() {
        let runs: &[&[u64]] = &[&[], &[2], &[]];
        assert_eq!(merge(runs, OutputPolicy::All, true), vec![2]);
        assert!(merge(&[], OutputPolicy::All, true).is_empty());
    }

    #[test]
    fn test_repeated_across_rounds() {
        // Round one: code 4 occurs once in each half
        let left_runs: &[&[u64]] = &[&[1, 4], &[2]];
        let right_runs: &[&[u64]] = &[&[4, 7], &[7]];
        let left = merge(left_runs, OutputPolicy::RepeatedOnly, false);
        let right = merge(right_runs, OutputPolicy::RepeatedOnly, false);
        assert_eq!(left, vec![1, 2, 4]);
        assert_eq!(right, vec![4, 7, 7]);
        let result = merge(&[left.as_slice(), right.as_slice()], OutputPolicy::RepeatedOnly, true);
        assert_eq!(result, vec![4, 7]);
    }

    #[test]
    fn test_unsorted_source_rejected() {
        let mut sources = vec![MemorySource::from_codes(&[5, 2])];
        let mut out: Vec<Record> = Vec::new();
        let err = merge_sorted(&mut sources, OutputPolicy::All, true, &RootTaxonomy, &mut out).unwrap_err();
        assert!(matches!(err, KmerSetError::IncompatibleInputs { .. }));
    }
}
