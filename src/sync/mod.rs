//! Full-replace replication of a run's events into the record store.
//!
//! Protocol: verify schema, list every existing record, delete them in
//! batches, then insert the new events in batches, in the order given. The
//! table is briefly empty between the phases.

pub mod retry;
pub mod store;

use metrics::counter;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::ingest::types::Event;
pub use retry::RetryPolicy;
pub use store::{AirtableStore, RecordStore, StoreCredentials, StoreError, StoreRow};

/// Store-imposed upper bound on records per write call.
pub const MAX_BATCH: usize = 10;

/// Guard against a store that keeps handing back continuation tokens.
const MAX_LIST_PAGES: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SyncStatus {
    Completed,
    Skipped { reason: String },
}

/// Counts from one sync. Partial failures show up in `errors`, never as a
/// returned error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    #[serde(flatten)]
    pub status: SyncStatus,
    /// Rows the store confirmed created.
    pub sent: usize,
    /// Events not attempted: blank titles, or all of them when sync is skipped
    /// or the clear phase could not run.
    pub skipped: usize,
    /// Existing rows the store confirmed deleted.
    pub cleared: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn skipped(reason: impl Into<String>, events: usize) -> Self {
        Self {
            status: SyncStatus::Skipped {
                reason: reason.into(),
            },
            sent: 0,
            skipped: events,
            cleared: 0,
            errors: Vec::new(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, SyncStatus::Skipped { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub batch_size: usize,
    /// Pause between consecutive batch calls.
    pub batch_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH,
            // Airtable allows 5 requests per second per base.
            batch_delay: Duration::from_millis(250),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct SyncClient {
    store: Arc<dyn RecordStore>,
    opts: SyncOptions,
}

impl SyncClient {
    pub fn new(store: Arc<dyn RecordStore>, opts: SyncOptions) -> Self {
        let batch_size = opts.batch_size.clamp(1, MAX_BATCH);
        Self {
            store,
            opts: SyncOptions { batch_size, ..opts },
        }
    }

    /// Airtable-backed client from env credentials; `None` when absent.
    pub fn from_env() -> Option<Self> {
        let creds = StoreCredentials::from_env()?;
        match AirtableStore::new(creds) {
            Ok(store) => Some(Self::new(Arc::new(store), SyncOptions::default())),
            Err(e) => {
                tracing::warn!(target: "sync", error = %e, "could not build store client");
                None
            }
        }
    }

    pub async fn sync(&self, events: &[Event]) -> SyncReport {
        if let Err(e) = self.opts.retry.run("verify_schema", || self.store.verify_schema()).await {
            tracing::warn!(target: "sync", error = %e, "schema verification failed, skipping sync");
            return SyncReport::skipped(format!("schema verification failed: {e}"), events.len());
        }

        let mut report = SyncReport {
            status: SyncStatus::Completed,
            sent: 0,
            skipped: 0,
            cleared: 0,
            errors: Vec::new(),
        };

        let existing = match self.list_all().await {
            Ok(ids) => ids,
            Err(e) => {
                // Inserting without clearing would double the table.
                tracing::error!(target: "sync", error = %e, "listing existing records failed");
                report.errors.push(format!("list: {e}"));
                report.skipped = events.len();
                return report;
            }
        };
        tracing::info!(target: "sync", existing = existing.len(), "clearing table");
        report.cleared = self.delete_all(&existing, &mut report.errors).await;

        let rows: Vec<StoreRow> = events
            .iter()
            .filter(|ev| !ev.title.trim().is_empty())
            .map(StoreRow::from)
            .collect();
        report.skipped = events.len() - rows.len();
        report.sent = self.insert_all(&rows, &mut report.errors).await;

        tracing::info!(
            target: "sync",
            sent = report.sent,
            skipped = report.skipped,
            cleared = report.cleared,
            errors = report.errors.len(),
            "sync finished"
        );
        report
    }

    /// Every record id in the table. A listing that cannot be completed is
    /// an error, never a shorter list.
    async fn list_all(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut seen_offsets = HashSet::new();
        let mut offset: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let page = self
                .opts
                .retry
                .run("list", || self.store.list_page(offset.as_deref()))
                .await?;
            ids.extend(page.ids);
            match page.offset {
                None => return Ok(ids),
                Some(next) if seen_offsets.insert(next.clone()) => offset = Some(next),
                Some(next) => {
                    return Err(StoreError::Decode(format!(
                        "continuation token {next} repeated after {} records",
                        ids.len()
                    )))
                }
            }
        }
        Err(StoreError::Decode(format!(
            "listing exceeded {MAX_LIST_PAGES} pages"
        )))
    }

    async fn delete_all(&self, ids: &[String], errors: &mut Vec<String>) -> usize {
        let mut cleared = 0usize;
        for (i, batch) in ids.chunks(self.opts.batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.opts.batch_delay).await;
            }
            match self.opts.retry.run("delete", || self.store.delete(batch)).await {
                Ok(n) => cleared += n,
                Err(e) => {
                    tracing::warn!(target: "sync", batch = i, error = %e, "delete batch failed");
                    counter!("sync_batches_failed_total").increment(1);
                    errors.push(format!("delete batch {i}: {e}"));
                }
            }
        }
        cleared
    }

    async fn insert_all(&self, rows: &[StoreRow], errors: &mut Vec<String>) -> usize {
        let mut sent = 0usize;
        for (i, batch) in rows.chunks(self.opts.batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.opts.batch_delay).await;
            }
            match self.opts.retry.run("create", || self.store.create(batch)).await {
                Ok(n) => sent += n,
                Err(e) => {
                    tracing::warn!(target: "sync", batch = i, error = %e, "insert batch failed");
                    counter!("sync_batches_failed_total").increment(1);
                    errors.push(format!("insert batch {i}: {e}"));
                }
            }
        }
        sent
    }
}
