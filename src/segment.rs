//! Time segments over record creation time
//!
//! Long scans (fail fixing, aggregation, archival) walk a partition one
//! segment at a time and page inside each segment, so memory stays bounded
//! and an interrupted run can resume from the last finished segment.

use crate::error::IndexerResult;
use crate::model::TransferRecord;

/// Half-open window `[start_time, end_time)` in unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    pub start_time: i64,
    pub end_time: i64,
}

impl Segment {
    pub fn new(start_time: i64, end_time: i64) -> Self {
        Self { start_time, end_time }
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start_time && ts < self.end_time
    }

    pub fn duration_secs(&self) -> i64 {
        self.end_time - self.start_time
    }
}

/// Split `[first, last]` into step-aligned contiguous segments
///
/// Segment boundaries are multiples of `step` so that repeated runs over a
/// growing range produce the same keys. The last segment ends right after
/// `last` and may be shorter than `step`; it is always included.
pub fn segments_between(first: i64, last: i64, step: i64) -> Vec<Segment> {
    if step <= 0 || last < first {
        return Vec::new();
    }
    let mut segments = Vec::new();
    let mut start = first - first.rem_euclid(step);
    while start <= last {
        let end = (start + step).min(last + 1);
        segments.push(Segment::new(start, end));
        start += step;
    }
    segments
}

/// Visit every page of a segment until a short page signals the end
///
/// `fetch(offset, limit)` returns one page. Pages are handed to `visit` in
/// order; the total number of records seen is returned.
pub fn scan_segment<F, V>(page_size: usize, mut fetch: F, mut visit: V) -> IndexerResult<usize>
where
    F: FnMut(usize, usize) -> IndexerResult<Vec<TransferRecord>>,
    V: FnMut(Vec<TransferRecord>) -> IndexerResult<()>,
{
    let mut offset = 0;
    loop {
        let page = fetch(offset, page_size)?;
        let n = page.len();
        visit(page)?;
        offset += n;
        if n < page_size {
            return Ok(offset);
        }
    }
}
