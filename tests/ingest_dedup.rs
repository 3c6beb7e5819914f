// tests/ingest_dedup.rs
mod common;

use common::{at, event};
use community_events_sync::ingest::dedup::{cap_and_sort, Accumulator};
use community_events_sync::StartTime;
use std::collections::HashSet;

fn batch(prefix: &str, days: &[u32]) -> Vec<community_events_sync::Event> {
    days.iter()
        .map(|d| event(&format!("{prefix} {d}"), StartTime::Resolved(at(2025, 6, *d, 9))))
        .collect()
}

#[test]
fn fingerprints_stay_distinct_across_sources() {
    let cutoff = at(2025, 6, 10, 0);
    let mut acc = Accumulator::new();
    acc.admit(batch("Walk", &[10, 11, 12, 12]), cutoff, true);
    // overlaps the first batch entirely
    let stats = acc.admit(batch("Walk", &[11, 12, 13]), cutoff, true);

    assert_eq!(stats.duplicates, 2);
    assert_eq!(stats.kept, 1);
    let unique: HashSet<_> = acc.events().iter().map(|e| e.fingerprint.clone()).collect();
    assert_eq!(unique.len(), acc.len());
    assert_eq!(acc.len(), 4);
}

#[test]
fn future_only_keeps_today_and_unresolved() {
    let cutoff = at(2025, 6, 10, 0);
    let mut acc = Accumulator::new();
    let mut input = batch("Fair", &[1, 9, 10, 11]);
    input.push(event("Someday", StartTime::Unresolved));

    let stats = acc.admit(input, cutoff, true);
    assert_eq!(stats.past, 2);
    assert!(acc.events().iter().all(|e| match e.start {
        StartTime::Resolved(ts) => ts >= cutoff,
        StartTime::Unresolved => true,
    }));
    assert_eq!(acc.len(), 3);
}

#[test]
fn sort_is_stable_and_idempotent() {
    let same = StartTime::Resolved(at(2025, 7, 4, 12));
    let events = vec![
        event("Parade", same),
        event("TBA", StartTime::Unresolved),
        event("Picnic", StartTime::Resolved(at(2025, 7, 1, 12))),
        event("Fireworks", same),
    ];
    let once = cap_and_sort(events, 10);
    let titles: Vec<_> = once.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, vec!["Picnic", "Parade", "Fireworks", "TBA"]);

    let twice = cap_and_sort(once.clone(), 10);
    assert_eq!(once, twice);
}
