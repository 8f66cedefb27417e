use std::collections::VecDeque;

use super::record::RedoRecord;
use crate::types::Result;

/// Delivers decoded records one at a time, in log order.
pub trait RecordSource {
    /// Returns the next record, or `None` at the end of the log.
    fn next_record(&mut self) -> Result<Option<RedoRecord>>;
}

/// In-memory log used by tests and tooling.
#[derive(Clone, Debug, Default)]
pub struct MemoryLog {
    records: VecDeque<RedoRecord>,
}

impl MemoryLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record to the end of the log.
    pub fn push(&mut self, record: RedoRecord) {
        self.records.push_back(record);
    }

    /// Number of records not yet consumed.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when every record has been consumed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<RedoRecord> for MemoryLog {
    fn from_iter<I: IntoIterator<Item = RedoRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl RecordSource for MemoryLog {
    fn next_record(&mut self) -> Result<Option<RedoRecord>> {
        Ok(self.records.pop_front())
    }
}

impl<S: RecordSource + ?Sized> RecordSource for &mut S {
    fn next_record(&mut self) -> Result<Option<RedoRecord>> {
        (**self).next_record()
    }
}
