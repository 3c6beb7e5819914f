// src/ingest/dedup.rs
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::ingest::fingerprint::Fingerprint;
use crate::ingest::types::{Event, StartTime};

/// Counts from one `admit` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmitStats {
    pub kept: usize,
    pub duplicates: usize,
    pub past: usize,
}

/// Whether `start` passes the time filter for `cutoff` (today at midnight).
pub fn is_current(start: &StartTime, cutoff: DateTime<Utc>) -> bool {
    match start {
        StartTime::Unresolved => true,
        StartTime::Resolved(ts) => *ts >= cutoff,
    }
}

/// Run-wide event accumulator. Holds the only seen-fingerprint set of a run,
/// so an event admitted once is never admitted again in the same run.
#[derive(Debug, Default)]
pub struct Accumulator {
    seen: HashSet<Fingerprint>,
    events: Vec<Event>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable filter: keeps candidates whose fingerprint is new to the run and,
    /// when `future_only`, whose start is unresolved or not before `cutoff`.
    pub fn admit(
        &mut self,
        candidates: Vec<Event>,
        cutoff: DateTime<Utc>,
        future_only: bool,
    ) -> AdmitStats {
        let mut stats = AdmitStats::default();
        for ev in candidates {
            if self.seen.contains(&ev.fingerprint) {
                stats.duplicates += 1;
                continue;
            }
            if future_only && !is_current(&ev.start, cutoff) {
                stats.past += 1;
                continue;
            }
            self.seen.insert(ev.fingerprint.clone());
            self.events.push(ev);
            stats.kept += 1;
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

/// Keep the first `cap` events, then order by start. `sort_by` is stable, so
/// events sharing an instant keep accumulation order.
pub fn cap_and_sort(mut events: Vec<Event>, cap: usize) -> Vec<Event> {
    events.truncate(cap);
    events.sort_by(|a, b| a.start.cmp(&b.start));
    events
}
