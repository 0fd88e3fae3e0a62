//! Archival of settled transfers from the active partition into history
//!
//! Only terminal records (Success, Refunded) older than the retention window
//! move. Each batch is copied with insert-or-ignore and deleted from active in
//! the same store transaction; a batch that is retried after a crash finds its
//! copies already in history and only completes the delete. A run holds the
//! store's partition gate exclusively, so aggregate scans never interleave
//! with it.

use crate::error::IndexerResult;
use crate::segment::segments_between;
use crate::store::{IndexStore, Partition};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub segments: usize,
    pub copied: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ArchivalMigrator {
    retention_secs: i64,
    step: i64,
    batch_size: usize,
}

impl ArchivalMigrator {
    pub fn new(retention_secs: i64, step: i64, batch_size: usize) -> Self {
        Self {
            retention_secs,
            step,
            batch_size,
        }
    }

    pub fn cutoff(&self, now: i64) -> i64 {
        now - self.retention_secs
    }

    /// Move every archivable record; waits for running aggregate scans first
    pub fn migrate(&self, store: &IndexStore, now: i64) -> IndexerResult<MigrationReport> {
        let _partitions = store.partitions_exclusive();
        let mut report = MigrationReport::default();
        let cutoff = self.cutoff(now);

        let Some((first, last)) = store.created_at_bounds(Partition::Active)? else {
            return Ok(report);
        };
        if first >= cutoff {
            return Ok(report);
        }

        for segment in segments_between(first, last.min(cutoff - 1), self.step) {
            report.segments += 1;
            loop {
                let ids = store.find_archivable_ids(&segment, cutoff, self.batch_size)?;
                if ids.is_empty() {
                    break;
                }
                let (copied, removed) = store.migrate_to_history(&ids)?;
                if copied < ids.len() {
                    log::info!(
                        "♻️  {} of {} records were already in history",
                        ids.len() - copied,
                        ids.len()
                    );
                }
                report.copied += copied;
                report.removed += removed;
                if ids.len() < self.batch_size {
                    break;
                }
            }
        }

        if report.removed > 0 {
            log::info!(
                "📦 Archived {} records ({} segments, cutoff {})",
                report.removed,
                report.segments,
                cutoff
            );
        }
        Ok(report)
    }
}
