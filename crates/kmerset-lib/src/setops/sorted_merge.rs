//! Sorted-merge strategy
//!
//! Streams sorted inputs. Union, repeated and unique walk a k-way merge one
//! code group at a time; intersection and difference keep the first input in
//! a sorted working set and sweep every other input against it with a single
//! cursor.

use tracing::debug;

use crate::error::{KmerSetError, Result};
use crate::record::{ensure_sorted, CountingSink, Record, RecordSink};
use crate::setops::{SetInput, SetStrategy};
use crate::sort::heap::MergeHeap;
use crate::taxonomy::{fold_taxid, Taxonomy};

/// One code with everything the merge saw for it
#[derive(Debug, Clone, Copy)]
struct Group {
    code: u64,
    taxid: u32,
    /// Number of distinct inputs holding the code
    inputs: usize,
}

/// Entry of the intersection/difference working set
#[derive(Debug, Clone, Copy)]
struct Slot {
    code: u64,
    taxid: u32,
    hit: bool,
}

/// K-way merge based [`SetStrategy`]; requires sorted inputs
pub struct SortedMerge<'t> {
    taxonomy: &'t dyn Taxonomy,
}

impl<'t> SortedMerge<'t> {
    /// Create the strategy
    pub fn new(taxonomy: &'t dyn Taxonomy) -> Self {
        Self { taxonomy }
    }

    fn check_sorted(inputs: &[SetInput<'_>]) -> Result<()> {
        match inputs.iter().find(|i| !i.info.sorted) {
            Some(input) => Err(KmerSetError::IncompatibleInputs {
                path: input.name.clone(),
                reason: "the merge strategy requires sorted inputs".to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Drive the k-way merge, handing each completed code group to `f`
    fn for_each_group<F>(&self, mut inputs: Vec<SetInput<'_>>, mut f: F) -> Result<()>
    where
        F: FnMut(Group) -> Result<()>,
    {
        Self::check_sorted(&inputs)?;

        let mut heap = MergeHeap::with_capacity(inputs.len());
        for (idx, input) in inputs.iter_mut().enumerate() {
            if let Some(record) = input.source.next_record()? {
                heap.push(record.code, record.taxid, idx);
            }
        }

        // stamp[i] holds the last group number input i contributed to
        let mut stamp = vec![u64::MAX; inputs.len()];
        let mut group_no = 0u64;
        let mut current: Option<Group> = None;

        while let Some(item) = heap.pop() {
            match current {
                Some(ref mut group) if group.code == item.key => {
                    group.taxid = fold_taxid(self.taxonomy, group.taxid, item.value);
                }
                _ => {
                    if let Some(done) = current {
                        f(done)?;
                    }
                    group_no += 1;
                    current = Some(Group {
                        code: item.key,
                        taxid: item.value,
                        inputs: 0,
                    });
                }
            }
            if stamp[item.source] != group_no {
                stamp[item.source] = group_no;
                if let Some(group) = current.as_mut() {
                    group.inputs += 1;
                }
            }

            let source = &mut inputs[item.source].source;
            if let Some(next) = source.next_record()? {
                ensure_sorted(&**source, item.key, next.code)?;
                heap.push(next.code, next.taxid, item.source);
            }
        }
        if let Some(done) = current {
            f(done)?;
        }
        Ok(())
    }

    fn emit_groups<P>(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink, keep: P) -> Result<u64>
    where
        P: Fn(&Group) -> bool,
    {
        let mut out = CountingSink::new(sink);
        self.for_each_group(inputs, |group| {
            if keep(&group) {
                out.write_record(Record::new(group.code, group.taxid))?;
            }
            Ok(())
        })?;
        Ok(out.count())
    }

    /// Load the first input as a deduplicated, folded working set
    fn working_set(&self, input: &mut SetInput<'_>) -> Result<Vec<Slot>> {
        let mut slots: Vec<Slot> = Vec::new();
        while let Some(record) = input.source.next_record()? {
            if let Some(last) = slots.last_mut() {
                if last.code == record.code {
                    last.taxid = fold_taxid(self.taxonomy, last.taxid, record.taxid);
                    continue;
                }
                ensure_sorted(&*input.source, last.code, record.code)?;
            }
            slots.push(Slot {
                code: record.code,
                taxid: record.taxid,
                hit: false,
            });
        }
        Ok(slots)
    }

    /// Sweep `input` against the working set, marking every slot it holds
    ///
    /// With `fold` set, matching taxids are folded into the slot. Reading
    /// stops as soon as the input passes the last slot.
    fn sweep(&self, slots: &mut [Slot], input: &mut SetInput<'_>, fold: bool) -> Result<()> {
        let mut cursor = 0;
        let mut prev: Option<u64> = None;
        while cursor < slots.len() {
            let Some(record) = input.source.next_record()? else {
                break;
            };
            if let Some(prev) = prev {
                ensure_sorted(&*input.source, prev, record.code)?;
            }
            prev = Some(record.code);

            while cursor < slots.len() && slots[cursor].code < record.code {
                cursor += 1;
            }
            if let Some(slot) = slots.get_mut(cursor) {
                if slot.code == record.code {
                    slot.hit = true;
                    if fold {
                        slot.taxid = fold_taxid(self.taxonomy, slot.taxid, record.taxid);
                    }
                }
            }
        }
        Ok(())
    }
}

fn write_slots(slots: &[Slot], sink: &mut dyn RecordSink) -> Result<u64> {
    for slot in slots {
        sink.write_record(Record::new(slot.code, slot.taxid))?;
    }
    Ok(slots.len() as u64)
}

impl SetStrategy for SortedMerge<'_> {
    fn name(&self) -> &'static str {
        "sorted-merge"
    }

    fn output_sorted(&self) -> bool {
        true
    }

    fn union(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<u64> {
        self.emit_groups(inputs, sink, |_| true)
    }

    fn intersection(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<u64> {
        Self::check_sorted(&inputs)?;
        let mut inputs = inputs.into_iter();
        let Some(mut first) = inputs.next() else {
            return Ok(0);
        };
        let mut slots = self.working_set(&mut first)?;

        for mut input in inputs {
            if slots.is_empty() {
                debug!("Intersection is empty, skipping '{}'", input.name.display());
                break;
            }
            self.sweep(&mut slots, &mut input, true)?;
            slots.retain_mut(|slot| std::mem::replace(&mut slot.hit, false));
        }
        write_slots(&slots, sink)
    }

    fn difference(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<u64> {
        Self::check_sorted(&inputs)?;
        let mut inputs = inputs.into_iter();
        let Some(mut first) = inputs.next() else {
            return Ok(0);
        };
        let mut slots = self.working_set(&mut first)?;

        for mut input in inputs {
            if slots.is_empty() {
                debug!("Difference is empty, skipping '{}'", input.name.display());
                break;
            }
            self.sweep(&mut slots, &mut input, false)?;
            slots.retain(|slot| !slot.hit);
        }
        write_slots(&slots, sink)
    }

    fn repeated(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<u64> {
        self.emit_groups(inputs, sink, |g| g.inputs >= 2)
    }

    fn unique(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<u64> {
        self.emit_groups(inputs, sink, |g| g.inputs == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MemorySource, StreamInfo};
    use crate::taxonomy::{ParentTaxonomy, RootTaxonomy};

    fn sorted_info() -> StreamInfo {
        StreamInfo {
            sorted: true,
            ..StreamInfo::kmers(8)
        }
    }

    fn input(records: Vec<Record>) -> SetInput<'static> {
        SetInput::new("mem", sorted_info(), MemorySource::new(records))
    }

    fn codes(codes: &[u64]) -> SetInput<'static> {
        input(codes.iter().map(|&c| Record::plain(c)).collect())
    }

    fn run(
        op: impl Fn(&SortedMerge<'_>, Vec<SetInput<'static>>, &mut Vec<Record>) -> Result<u64>,
        inputs: Vec<SetInput<'static>>,
    ) -> Vec<u64> {
        let strategy = SortedMerge::new(&RootTaxonomy);
        let mut out: Vec<Record> = Vec::new();
        let n = op(&strategy, inputs, &mut out).unwrap();
        assert_eq!(n as usize, out.len());
        out.into_iter().map(|r| r.code).collect()
    }

    #[test]
    fn test_union() {
        let out = run(|s, i, o| s.union(i, o), vec![codes(&[1, 1, 5]), codes(&[1, 3]), codes(&[])]);
        assert_eq!(out, vec![1, 3, 5]);
    }

    #[test]
    fn test_intersection_with_lca() {
        let taxonomy = ParentTaxonomy::from_pairs([(1, 1), (3, 1), (9, 3), (7, 3), (33, 7)]);
        let strategy = SortedMerge::new(&taxonomy);
        let a = input(vec![Record::new(2, 9), Record::new(4, 9), Record::new(6, 9)]);
        let b = input(vec![Record::new(4, 33), Record::new(6, 33), Record::new(8, 33)]);
        let mut out: Vec<Record> = Vec::new();
        assert_eq!(strategy.intersection(vec![a, b], &mut out).unwrap(), 2);
        assert_eq!(out, vec![Record::new(4, 3), Record::new(6, 3)]);
    }

    #[test]
    fn test_intersection_three_inputs() {
        let out = run(
            |s, i, o| s.intersection(i, o),
            vec![codes(&[2, 4, 6, 8]), codes(&[4, 6, 9]), codes(&[2, 4, 6])],
        );
        assert_eq!(out, vec![4, 6]);
        let out = run(|s, i, o| s.intersection(i, o), vec![codes(&[1]), codes(&[2]), codes(&[1])]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_difference() {
        let out = run(
            |s, i, o| s.difference(i, o),
            vec![codes(&[1, 2, 2, 3, 4]), codes(&[2]), codes(&[0, 4, 9])],
        );
        assert_eq!(out, vec![1, 3]);
    }

    #[test]
    fn test_difference_keeps_first_input_taxids() {
        let strategy = SortedMerge::new(&RootTaxonomy);
        let a = input(vec![Record::new(1, 7), Record::new(2, 7)]);
        let b = input(vec![Record::new(2, 9)]);
        let mut out: Vec<Record> = Vec::new();
        strategy.difference(vec![a, b], &mut out).unwrap();
        assert_eq!(out, vec![Record::new(1, 7)]);
    }

    #[test]
    fn test_repeated_and_unique() {
        let inputs = || vec![codes(&[1, 1, 2]), codes(&[2, 3]), codes(&[3, 4])];
        assert_eq!(run(|s, i, o| s.repeated(i, o), inputs()), vec![2, 3]);
        assert_eq!(run(|s, i, o| s.unique(i, o), inputs()), vec![1, 4]);
    }

    #[test]
    fn test_rejects_unsorted_flag() {
        let strategy = SortedMerge::new(&RootTaxonomy);
        let unsorted = SetInput::new("u", StreamInfo::kmers(8), MemorySource::from_codes(&[1]));
        let err = strategy.union(vec![codes(&[1]), unsorted], &mut Vec::<Record>::new()).unwrap_err();
        assert!(matches!(err, KmerSetError::IncompatibleInputs { .. }));
    }

    #[test]
    fn test_rejects_out_of_order_records() {
        let err = SortedMerge::new(&RootTaxonomy)
            .union(vec![codes(&[5, 2]), codes(&[3])], &mut Vec::<Record>::new())
            .unwrap_err();
        assert!(matches!(err, KmerSetError::IncompatibleInputs { .. }));
        let err = SortedMerge::new(&RootTaxonomy)
            .intersection(vec![codes(&[1, 5]), codes(&[4, 2])], &mut Vec::<Record>::new())
            .unwrap_err();
        assert!(matches!(err, KmerSetError::IncompatibleInputs { .. }));
    }
}
