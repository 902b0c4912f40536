//! Output policies applied while merging sorted runs
//!
//! Records arrive grouped by code. For each group the folder decides how many
//! copies to pass on and folds the taxids of the group with LCA.
//!
//! `RepeatedOnly` has to survive several merge rounds. A non-final round
//! cannot drop a code yet, since its other occurrences may sit in a run it
//! never sees. It therefore passes a single occurrence on once and a repeated
//! code on exactly twice, the second copy acting as the repeat marker. Only
//! the final round drops codes seen fewer than two times.

use std::fmt;

use crate::error::Result;
use crate::record::{Record, RecordSink};
use crate::taxonomy::{fold_taxid, Taxonomy};

/// What to emit for each code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputPolicy {
    /// Every record, duplicates included
    #[default]
    All,
    /// One record per distinct code
    Unique,
    /// One record per code occurring more than once
    RepeatedOnly,
}

impl fmt::Display for OutputPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputPolicy::All => "all",
            OutputPolicy::Unique => "unique",
            OutputPolicy::RepeatedOnly => "repeated-only",
        };
        f.write_str(name)
    }
}

/// Streaming group folder implementing an [`OutputPolicy`]
///
/// Feed records in non-decreasing code order with [`push`](Self::push) and
/// close with [`finish`](Self::finish).
pub struct PolicyFolder<'t> {
    policy: OutputPolicy,
    final_pass: bool,
    taxonomy: &'t dyn Taxonomy,
    current: Option<Record>,
    count: u64,
}

impl<'t> PolicyFolder<'t> {
    /// Create a folder; `final_pass` enables dropping for `RepeatedOnly`
    pub fn new(policy: OutputPolicy, final_pass: bool, taxonomy: &'t dyn Taxonomy) -> Self {
        Self {
            policy,
            final_pass,
            taxonomy,
            current: None,
            count: 0,
        }
    }

    /// Accept the next record
    #[inline]
    pub fn push(&mut self, record: Record, sink: &mut dyn RecordSink) -> Result<()> {
        if self.policy == OutputPolicy::All {
            return sink.write_record(record);
        }
        if let Some(current) = self.current.as_mut() {
            if current.code == record.code {
                current.taxid = fold_taxid(self.taxonomy, current.taxid, record.taxid);
                self.count += 1;
                return Ok(());
            }
        }
        self.flush(sink)?;
        self.current = Some(record);
        self.count = 1;
        Ok(())
    }

    fn flush(&mut self, sink: &mut dyn RecordSink) -> Result<()> {
        let Some(record) = self.current.take() else {
            return Ok(());
        };
        let copies = match (self.policy, self.final_pass) {
            (OutputPolicy::All, _) | (OutputPolicy::Unique, _) => 1,
            (OutputPolicy::RepeatedOnly, true) => u64::from(self.count >= 2),
            (OutputPolicy::RepeatedOnly, false) => self.count.min(2),
        };
        for _ in 0..copies {
            sink.write_record(record)?;
        }
        Ok(())
    }

    /// Emit the last group
    pub fn finish(&mut self, sink: &mut dyn RecordSink) -> Result<()> {
        self.flush(sink)?;
        self.count = 0;
        Ok(())
    }
}

/// Apply a policy to a code-sorted slice
pub fn apply_policy(
    records: &[Record],
    policy: OutputPolicy,
    final_pass: bool,
    taxonomy: &dyn Taxonomy,
    sink: &mut dyn RecordSink,
) -> Result<()> {
    let mut folder = PolicyFolder::new(policy, final_pass, taxonomy);
    for &record in records {
        folder.push(record, sink)?;
    }
    folder.finish(sink)
}
