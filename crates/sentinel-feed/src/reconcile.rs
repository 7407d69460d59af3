//! Merge rules for the displayed feed.
//!
//! The remote store is always refetched as a full window, so remote entries
//! already on screen are replaced wholesale by the fresh set. Local entries
//! on screen are carried forward. The union is deduplicated by id, ordered
//! by `(timestamp, id)` and cut to the most recent `cap` records.

use std::collections::HashSet;

use sentinel_types::LogRecord;

pub fn reconcile(
    displayed: &[LogRecord],
    fresh_remote: &[LogRecord],
    local: &[LogRecord],
    cap: usize,
) -> Vec<LogRecord> {
    let carried = displayed.iter().filter(|record| record.is_local());
    let mut seen = HashSet::new();
    let mut merged = fresh_remote
        .iter()
        .chain(carried)
        .chain(local.iter())
        .filter(|record| seen.insert(record.id.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    merged.sort_by(LogRecord::chronological);
    keep_most_recent(merged, cap)
}

/// Adds one record pushed through the local subscription. No refetch.
pub fn merge_record(displayed: &[LogRecord], record: &LogRecord, cap: usize) -> Vec<LogRecord> {
    if displayed.iter().any(|existing| existing.id == record.id) {
        return displayed.to_vec();
    }
    let mut merged = Vec::with_capacity(displayed.len() + 1);
    merged.extend_from_slice(displayed);
    let at = merged.partition_point(|existing| LogRecord::chronological(existing, record).is_le());
    merged.insert(at, record.clone());
    keep_most_recent(merged, cap)
}

/// Remote-origin entries currently on screen.
pub fn displayed_remote(displayed: &[LogRecord]) -> Vec<LogRecord> {
    displayed
        .iter()
        .filter(|record| !record.is_local())
        .cloned()
        .collect()
}

fn keep_most_recent(mut records: Vec<LogRecord>, cap: usize) -> Vec<LogRecord> {
    if records.len() > cap {
        records.drain(..records.len() - cap);
    }
    records
}
