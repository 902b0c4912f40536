//! Hash-join strategy
//!
//! Works on inputs in any order by holding a code -> taxid map in memory.
//! Output comes out in hash order unless sorting is requested.

use ahash::AHashMap;
use rayon::prelude::*;
use tracing::debug;

use crate::error::Result;
use crate::record::{Record, RecordSink};
use crate::setops::{SetInput, SetStrategy};
use crate::taxonomy::{fold_taxid, Taxonomy};

/// Presence bookkeeping for repeated/unique
struct Presence {
    taxid: u32,
    inputs: u32,
    last_input: usize,
}

/// Hash-map based [`SetStrategy`]
pub struct HashJoin<'t> {
    taxonomy: &'t dyn Taxonomy,
    sort_output: bool,
}

impl<'t> HashJoin<'t> {
    /// Create the strategy; `sort_output` sorts results before writing
    pub fn new(taxonomy: &'t dyn Taxonomy, sort_output: bool) -> Self {
        Self { taxonomy, sort_output }
    }

    fn emit<I>(&self, records: I, sink: &mut dyn RecordSink) -> Result<u64>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut records: Vec<Record> = records.into_iter().collect();
        if self.sort_output {
            records.par_sort_unstable_by_key(|r| r.code);
        }
        for &record in &records {
            sink.write_record(record)?;
        }
        Ok(records.len() as u64)
    }

    /// Load an input into a folded code -> taxid map
    fn load(&self, input: &mut SetInput<'_>) -> Result<AHashMap<u64, u32>> {
        let mut map = AHashMap::new();
        while let Some(record) = input.source.next_record()? {
            map.entry(record.code)
                .and_modify(|t| *t = fold_taxid(self.taxonomy, *t, record.taxid))
                .or_insert(record.taxid);
        }
        Ok(map)
    }

    fn presence(&self, inputs: Vec<SetInput<'_>>) -> Result<AHashMap<u64, Presence>> {
        let mut map: AHashMap<u64, Presence> = AHashMap::new();
        for (idx, mut input) in inputs.into_iter().enumerate() {
            while let Some(record) = input.source.next_record()? {
                let entry = map.entry(record.code).or_insert(Presence {
                    taxid: 0,
                    inputs: 0,
                    last_input: usize::MAX,
                });
                entry.taxid = fold_taxid(self.taxonomy, entry.taxid, record.taxid);
                if entry.last_input != idx {
                    entry.last_input = idx;
                    entry.inputs += 1;
                }
            }
        }
        Ok(map)
    }
}

impl SetStrategy for HashJoin<'_> {
    fn name(&self) -> &'static str {
        "hash-join"
    }

    fn output_sorted(&self) -> bool {
        self.sort_output
    }

    fn union(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<u64> {
        let mut map: AHashMap<u64, u32> = AHashMap::new();
        for mut input in inputs {
            while let Some(record) = input.source.next_record()? {
                map.entry(record.code)
                    .and_modify(|t| *t = fold_taxid(self.taxonomy, *t, record.taxid))
                    .or_insert(record.taxid);
            }
        }
        self.emit(map.into_iter().map(|(code, taxid)| Record::new(code, taxid)), sink)
    }

    fn intersection(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<u64> {
        let mut inputs = inputs.into_iter();
        let Some(mut first) = inputs.next() else {
            return Ok(0);
        };
        let mut working: AHashMap<u64, (u32, bool)> = self
            .load(&mut first)?
            .into_iter()
            .map(|(code, taxid)| (code, (taxid, false)))
            .collect();

        for mut input in inputs {
            if working.is_empty() {
                debug!("Intersection is empty, skipping '{}'", input.name.display());
                break;
            }
            while let Some(record) = input.source.next_record()? {
                if let Some((taxid, marked)) = working.get_mut(&record.code) {
                    *taxid = fold_taxid(self.taxonomy, *taxid, record.taxid);
                    *marked = true;
                }
            }
            working.retain(|_, (_, marked)| std::mem::replace(marked, false));
        }
        self.emit(working.into_iter().map(|(code, (taxid, _))| Record::new(code, taxid)), sink)
    }

    fn difference(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<u64> {
        let mut inputs = inputs.into_iter();
        let Some(mut first) = inputs.next() else {
            return Ok(0);
        };
        let mut working = self.load(&mut first)?;

        for mut input in inputs {
            if working.is_empty() {
                debug!("Difference is empty, skipping '{}'", input.name.display());
                break;
            }
            while let Some(record) = input.source.next_record()? {
                working.remove(&record.code);
            }
        }
        self.emit(working.into_iter().map(|(code, taxid)| Record::new(code, taxid)), sink)
    }

    fn repeated(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<u64> {
        let map = self.presence(inputs)?;
        self.emit(
            map.into_iter()
                .filter(|(_, p)| p.inputs >= 2)
                .map(|(code, p)| Record::new(code, p.taxid)),
            sink,
        )
    }

    fn unique(&self, inputs: Vec<SetInput<'_>>, sink: &mut dyn RecordSink) -> Result<u64> {
        let map = self.presence(inputs)?;
        self.emit(
            map.into_iter()
                .filter(|(_, p)| p.inputs == 1)
                .map(|(code, p)| Record::new(code, p.taxid)),
            sink,
        )
    }
}
