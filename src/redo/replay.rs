use tracing::{debug, info};

use super::{RedoAction, RedoEngine, RedoSummary};
use crate::types::{FatalError, Lsn, Result};
use crate::wal::{OpCode, RecordSource, RedoRecord};

/// Counters collected while replaying a log.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReplayStats {
    /// Records replayed.
    pub records: u64,
    /// Allocate-entry records replayed.
    pub allocate_entry: u64,
    /// Clean records replayed.
    pub clean: u64,
    /// Clear-back-reference records replayed.
    pub clear_location: u64,
    /// Blocks whose logged change was re-applied.
    pub blocks_applied: u64,
    /// Blocks restored from a full-page image.
    pub blocks_reconstructed: u64,
    /// Blocks left alone.
    pub blocks_skipped: u64,
    /// End position of the last record replayed.
    pub last_lsn: Option<Lsn>,
}

impl ReplayStats {
    fn record(&mut self, summary: &RedoSummary) {
        self.records += 1;
        match summary.op {
            OpCode::AllocateEntry => self.allocate_entry += 1,
            OpCode::Clean => self.clean += 1,
            OpCode::ClearLocation => self.clear_location += 1,
        }
        for outcome in &summary.blocks {
            match outcome.action {
                RedoAction::ApplyDelta => self.blocks_applied += 1,
                RedoAction::Reconstruct => self.blocks_reconstructed += 1,
                RedoAction::Skip => self.blocks_skipped += 1,
            }
        }
        self.last_lsn = Some(summary.end_lsn);
    }
}

/// Sequential replay driver: one record at a time, strictly in log order.
pub struct Replayer<'a> {
    engine: &'a RedoEngine,
    stats: ReplayStats,
    flush_on_finish: bool,
}

impl<'a> Replayer<'a> {
    /// Creates a replayer over `engine`.
    pub fn new(engine: &'a RedoEngine) -> Self {
        Self {
            engine,
            stats: ReplayStats::default(),
            flush_on_finish: false,
        }
    }

    /// Flush the buffer cache once the source is exhausted.
    pub fn flush_on_finish(mut self, flush: bool) -> Self {
        self.flush_on_finish = flush;
        self
    }

    /// Replays one record. Its end position must exceed every earlier one.
    pub fn apply(&mut self, record: &RedoRecord) -> Result<RedoSummary> {
        if let Some(last) = self.stats.last_lsn {
            if record.end_lsn <= last {
                return Err(FatalError::MalformedRecord("record LSN not increasing").into());
            }
        }
        let summary = self.engine.redo(record)?;
        self.stats.record(&summary);
        Ok(summary)
    }

    /// Replays every record `source` yields, stopping at the first error.
    pub fn run<S: RecordSource>(&mut self, mut source: S) -> Result<ReplayStats> {
        while let Some(record) = source.next_record()? {
            self.apply(&record)?;
        }
        if self.flush_on_finish {
            let pages = self.engine.flush()?;
            debug!(pages, "redo.replay.flush");
        }
        info!(
            records = self.stats.records,
            applied = self.stats.blocks_applied,
            reconstructed = self.stats.blocks_reconstructed,
            skipped = self.stats.blocks_skipped,
            last_lsn = self.stats.last_lsn.map(|lsn| lsn.0),
            "redo.replay.completed"
        );
        Ok(self.stats.clone())
    }

    /// Counters so far.
    pub fn stats(&self) -> &ReplayStats {
        &self.stats
    }
}
