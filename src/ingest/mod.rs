// src/ingest/mod.rs
pub mod config;
pub mod dates;
pub mod dedup;
pub mod fingerprint;
pub mod normalize;
pub mod runner;
pub mod sources;
pub mod summary;
pub mod types;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::browser::{Browser, Page};
use crate::ingest::config::{is_enabled, RunConfig};
use crate::ingest::dates::DateResolver;
use crate::ingest::dedup::{cap_and_sort, Accumulator};
use crate::ingest::normalize::EventNormalizer;
use crate::ingest::runner::{SourceOutcome, SourceRunner};
use crate::ingest::summary::{
    RunError, RunStore, RunSummary, EVENTS_KEY, LATEST_ERROR_KEY, LATEST_RUN_KEY,
};
use crate::ingest::types::{Event, SourceTask};
use crate::sync::{SyncClient, SyncReport};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("harvest_events_total", "Raw records extracted from sources.");
        describe_counter!(
            "harvest_kept_total",
            "Events kept after dedup + time filtering."
        );
        describe_counter!(
            "harvest_rejected_total",
            "Records rejected by normalization or unreadable as records."
        );
        describe_counter!("harvest_dedup_total", "Events dropped as duplicates within a run.");
        describe_counter!("harvest_past_total", "Events dropped as already past.");
        describe_counter!(
            "harvest_source_errors_total",
            "Sources that failed, timed out or returned bad data."
        );
        describe_histogram!("harvest_source_ms", "Per-source extraction time in milliseconds.");
        describe_gauge!("harvest_last_run_ts", "Unix ts when the harvest last finished.");
        describe_counter!("sync_batches_failed_total", "Store batches that exhausted retries.");
        describe_counter!("sync_retries_total", "Store calls retried.");
    });
}

/// Clean scraped text: decode entities, drop stray tags, ASCII quotes,
/// collapse whitespace, trim.
pub fn clean_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[a-z][^>]*>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (Unicode \s covers nbsp)
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Running totals for one harvest pass.
#[derive(Debug, Default)]
struct Progress {
    acc: Accumulator,
    outcomes: Vec<SourceOutcome>,
    total_found: usize,
    rejected: usize,
    duplicates: usize,
    past: usize,
}

/// Drives one run: sources in order, then cap, sort, sync and summary.
pub struct Harvester {
    config: RunConfig,
    sources: Vec<Box<dyn SourceTask>>,
    runner: SourceRunner,
    resolver: DateResolver,
    store: Arc<dyn RunStore>,
    sync: Option<SyncClient>,
}

impl Harvester {
    pub fn new(
        config: RunConfig,
        sources: Vec<Box<dyn SourceTask>>,
        store: Arc<dyn RunStore>,
        sync: Option<SyncClient>,
    ) -> Self {
        let config = config.sanitized();
        Self {
            runner: SourceRunner::new(config.source_timeout()),
            resolver: DateResolver::from_utc_offset_hours(config.utc_offset_hours),
            config,
            sources,
            store,
            sync,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Sources selected by the enable list, in catalogue order.
    pub fn enabled_sources(&self) -> Vec<&dyn SourceTask> {
        self.sources
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| is_enabled(s.town(), s.name(), &self.config.towns))
            .collect()
    }

    pub async fn run(&self, browser: &dyn Browser) -> Result<RunSummary> {
        self.run_at(browser, Utc::now()).await
    }

    /// Full run with an explicit clock.
    pub async fn run_at(&self, browser: &dyn Browser, now: DateTime<Utc>) -> Result<RunSummary> {
        ensure_metrics_described();

        let page = match browser.new_page().await {
            Ok(p) => p,
            Err(e) => {
                let err = anyhow!(e).context("acquiring browser page");
                self.record_failure(&err, now, &Progress::default()).await;
                return Err(err);
            }
        };

        let progress = self.harvest(page.as_ref(), now).await;

        if let Err(e) = page.close().await {
            tracing::warn!(target: "ingest", error = %e, "closing page failed");
        }

        self.finish(progress, now).await
    }

    async fn harvest(&self, page: &dyn Page, now: DateTime<Utc>) -> Progress {
        let cutoff = self.resolver.start_of_today(now);
        let enabled = self.enabled_sources();
        tracing::info!(
            target: "ingest",
            sources = enabled.len(),
            future_only = self.config.future_only,
            %cutoff,
            "harvest started"
        );

        let mut progress = Progress::default();
        for (i, task) in enabled.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.source_delay()).await;
            }

            let run = self.runner.run(*task, page).await;
            let mut outcome = run.outcome;

            let normalizer = EventNormalizer::new(task.profile(), self.resolver, now);
            let (events, rejected) = normalizer.normalize_all(&run.raws);
            let rejected = rejected + run.unusable;
            let found = run.raws.len() + run.unusable;
            let stats = progress
                .acc
                .admit(events, cutoff, self.config.future_only);

            progress.total_found += found;
            progress.rejected += rejected;
            progress.duplicates += stats.duplicates;
            progress.past += stats.past;
            outcome.count = stats.kept;

            counter!("harvest_events_total").increment(found as u64);
            counter!("harvest_rejected_total").increment(rejected as u64);
            counter!("harvest_dedup_total").increment(stats.duplicates as u64);
            counter!("harvest_past_total").increment(stats.past as u64);
            counter!("harvest_kept_total").increment(stats.kept as u64);

            tracing::debug!(
                target: "ingest",
                source = %outcome.name,
                kept = stats.kept,
                rejected,
                duplicates = stats.duplicates,
                past = stats.past,
                "source processed"
            );
            progress.outcomes.push(outcome);
        }
        progress
    }

    async fn finish(&self, progress: Progress, now: DateTime<Utc>) -> Result<RunSummary> {
        let accumulated = progress.acc.len();
        let Progress {
            acc,
            outcomes,
            total_found,
            rejected,
            duplicates,
            past,
        } = progress;

        let events = cap_and_sort(acc.into_events(), self.config.max_events);
        if events.len() < accumulated {
            tracing::info!(
                target: "ingest",
                dropped = accumulated - events.len(),
                cap = self.config.max_events,
                "global cap applied"
            );
        }

        let counts = FailureCounts {
            total_found,
            accumulated: events.len(),
            sources_done: outcomes.len(),
        };
        if let Err(e) = self.persist_events(&events).await {
            self.record_failure_counts(&e, now, counts).await;
            return Err(e);
        }

        let sync = match &self.sync {
            Some(client) => client.sync(&events).await,
            None => {
                tracing::info!(target: "sync", "store credentials absent, sync skipped");
                SyncReport::skipped("store credentials absent", events.len())
            }
        };

        let summary = RunSummary {
            started_at: now,
            finished_at: Utc::now(),
            total_found,
            total_after_filtering: events.len(),
            rejected,
            duplicates,
            past,
            sources: outcomes,
            sync,
            config: serde_json::to_value(&self.config).unwrap_or_default(),
        };

        let value = serde_json::to_value(&summary).context("serializing run summary")?;
        if let Err(e) = self
            .store
            .put(LATEST_RUN_KEY, value)
            .await
            .context("persisting run summary")
        {
            self.record_failure_counts(&e, now, counts).await;
            return Err(e);
        }

        gauge!("harvest_last_run_ts").set(Utc::now().timestamp() as f64);
        tracing::info!(
            target: "ingest",
            found = summary.total_found,
            kept = summary.total_after_filtering,
            failed_sources = summary.sources.iter().filter(|o| !o.is_success()).count(),
            sent = summary.sync.sent,
            "run finished"
        );
        Ok(summary)
    }

    /// Record a failure that happened before the run could start.
    pub async fn record_fatal(&self, err: &anyhow::Error) {
        self.record_failure(err, Utc::now(), &Progress::default()).await;
    }

    async fn persist_events(&self, events: &[Event]) -> Result<()> {
        let value = serde_json::to_value(events).context("serializing events")?;
        self.store
            .put(EVENTS_KEY, value)
            .await
            .context("persisting events")
    }

    async fn record_failure(&self, err: &anyhow::Error, now: DateTime<Utc>, progress: &Progress) {
        let counts = FailureCounts {
            total_found: progress.total_found,
            accumulated: progress.acc.len(),
            sources_done: progress.outcomes.len(),
        };
        self.record_failure_counts(err, now, counts).await;
    }

    /// Best effort: a failing store here only gets logged.
    async fn record_failure_counts(
        &self,
        err: &anyhow::Error,
        now: DateTime<Utc>,
        counts: FailureCounts,
    ) {
        tracing::error!(target: "ingest", error = ?err, "run failed");
        let record = RunError {
            at: now,
            message: format!("{err:#}"),
            total_found: counts.total_found,
            accumulated: counts.accumulated,
            sources_done: counts.sources_done,
        };
        let value = match serde_json::to_value(&record) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(target: "ingest", error = %e, "serializing error record failed");
                return;
            }
        };
        if let Err(e) = self.store.put(LATEST_ERROR_KEY, value).await {
            tracing::error!(target: "ingest", error = ?e, "persisting error record failed");
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureCounts {
    total_found: usize,
    accumulated: usize,
    sources_done: usize,
}
