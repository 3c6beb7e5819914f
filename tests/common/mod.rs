// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use community_events_sync::browser::{Browser, BrowserError, Page};
use community_events_sync::ingest::fingerprint::fingerprint;
use community_events_sync::ingest::types::{Event, SourceProfile, SourceTask, StartTime};
use community_events_sync::sync::retry::RetryPolicy;
use community_events_sync::sync::store::{RecordPage, RecordStore, StoreError, StoreRow};
use community_events_sync::sync::SyncOptions;

pub fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

pub fn event(title: &str, start: StartTime) -> Event {
    Event {
        title: title.to_string(),
        description: format!("About {title}"),
        start_raw: String::new(),
        start,
        location: "Hall".into(),
        url: String::new(),
        category_hint: "General".into(),
        source: "Test Source".into(),
        fetched_at: at(2025, 6, 1, 0),
        fingerprint: fingerprint(title, "", &format!("About {title}"), "Test Source"),
    }
}

pub fn fast_sync() -> SyncOptions {
    SyncOptions {
        batch_size: 10,
        batch_delay: Duration::ZERO,
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            rate_limit_wait: Duration::from_millis(1),
        },
    }
}

// ---------------- record store double ----------------

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Verify,
    List(Option<String>),
    Delete(Vec<String>),
    Create(Vec<StoreRow>),
}

pub struct MockStore {
    pub existing: Mutex<Vec<String>>,
    pub created: Mutex<Vec<StoreRow>>,
    pub calls: Mutex<Vec<Call>>,
    pub page_size: usize,
    pub schema_ok: bool,
    pub create_failures: Mutex<VecDeque<StoreError>>,
    pub list_failures: Mutex<VecDeque<StoreError>>,
    /// When set, every listed page points at this same continuation token.
    pub stuck_offset: Option<String>,
}

impl MockStore {
    pub fn with_rows(n: usize) -> Self {
        Self {
            existing: Mutex::new((0..n).map(|i| format!("recOld{i:03}")).collect()),
            created: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            page_size: 5,
            schema_ok: true,
            create_failures: Mutex::new(VecDeque::new()),
            list_failures: Mutex::new(VecDeque::new()),
            stuck_offset: None,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RecordStore for MockStore {
    async fn verify_schema(&self) -> Result<(), StoreError> {
        self.calls.lock().push(Call::Verify);
        if self.schema_ok {
            Ok(())
        } else {
            Err(StoreError::Schema("table RawEvents lacks columns: hash".into()))
        }
    }

    async fn list_page(&self, offset: Option<&str>) -> Result<RecordPage, StoreError> {
        self.calls.lock().push(Call::List(offset.map(String::from)));
        if let Some(e) = self.list_failures.lock().pop_front() {
            return Err(e);
        }
        let start: usize = offset.and_then(|o| o.parse().ok()).unwrap_or(0);
        let rows = self.existing.lock();
        let end = (start + self.page_size).min(rows.len());
        let ids = rows[start.min(end)..end].to_vec();
        let next = match &self.stuck_offset {
            Some(o) => Some(o.clone()),
            None => (end < rows.len()).then(|| end.to_string()),
        };
        Ok(RecordPage { ids, offset: next })
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, StoreError> {
        self.calls.lock().push(Call::Delete(ids.to_vec()));
        let mut rows = self.existing.lock();
        let before = rows.len();
        rows.retain(|r| !ids.contains(r));
        Ok(before - rows.len())
    }

    async fn create(&self, rows: &[StoreRow]) -> Result<usize, StoreError> {
        self.calls.lock().push(Call::Create(rows.to_vec()));
        if let Some(e) = self.create_failures.lock().pop_front() {
            return Err(e);
        }
        self.created.lock().extend_from_slice(rows);
        Ok(rows.len())
    }
}

// ---------------- browser double ----------------

#[derive(Default)]
pub struct PageLog {
    pub visited: Mutex<Vec<String>>,
    pub closed: AtomicBool,
    pub opened: AtomicUsize,
}

pub struct FakePage {
    log: Arc<PageLog>,
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str, _wait_for: Option<&str>) -> Result<(), BrowserError> {
        self.log.visited.lock().push(url.to_string());
        Ok(())
    }

    async fn evaluate(&self, _expression: &str) -> Result<Value, BrowserError> {
        Ok(Value::Array(Vec::new()))
    }

    async fn texts(&self, _selector: &str) -> Result<Vec<String>, BrowserError> {
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.log.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeBrowser {
    pub log: Arc<PageLog>,
    pub fail: bool,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self {
            log: Arc::new(PageLog::default()),
            fail: false,
        }
    }

    pub fn page(&self) -> FakePage {
        FakePage {
            log: self.log.clone(),
        }
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_page(&self) -> Result<Box<dyn Page>, BrowserError> {
        if self.fail {
            return Err(BrowserError::Network("connection refused".into()));
        }
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.page()))
    }
}

// ---------------- source double ----------------

pub enum Behavior {
    Payload(Value),
    Fail(String),
    Hang,
}

pub struct ScriptedSource {
    pub profile: SourceProfile,
    pub town: String,
    pub behavior: Behavior,
}

impl ScriptedSource {
    pub fn new(name: &str, town: &str, behavior: Behavior) -> Self {
        let mut profile = SourceProfile::new(name, &format!("https://{}.example.org/events", town.to_lowercase()));
        profile.default_location = format!("{town} Town Hall");
        Self {
            profile,
            town: town.to_string(),
            behavior,
        }
    }
}

#[async_trait]
impl SourceTask for ScriptedSource {
    fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    fn town(&self) -> &str {
        &self.town
    }

    async fn extract(&self, page: &dyn Page) -> anyhow::Result<Value> {
        page.goto(&self.profile.url, None).await?;
        match &self.behavior {
            Behavior::Payload(v) => Ok(v.clone()),
            Behavior::Fail(msg) => Err(anyhow::anyhow!(msg.clone())),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}
