// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::browser::Page;
use crate::ingest::fingerprint::Fingerprint;

/// What an extraction step hands back for one candidate event.
/// Every field is optional; normalization decides what survives.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RawExtraction {
    pub title_text: Option<String>,
    pub description_text: Option<String>,
    pub date_text: Option<String>,
    pub location_text: Option<String>,
    pub url_text: Option<String>,
    pub source_name: Option<String>,
}

/// Accepted keys per field, in order of preference.
const TITLE_KEYS: [&str; 3] = ["title_text", "titleText", "title"];
const DESCRIPTION_KEYS: [&str; 3] = ["description_text", "descriptionText", "description"];
const DATE_KEYS: [&str; 3] = ["date_text", "dateText", "date"];
const LOCATION_KEYS: [&str; 3] = ["location_text", "locationText", "location"];
const URL_KEYS: [&str; 4] = ["url_text", "urlText", "url", "link"];
const SOURCE_KEYS: [&str; 3] = ["source_name", "sourceName", "source"];

/// First non-empty scalar among `keys`. Numbers and booleans are taken as
/// their JSON text; nulls, arrays and objects are ignored.
fn first_text(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match fields.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

impl RawExtraction {
    /// Lenient read of one extraction object. Never fails: repeated aliases
    /// and odd value types degrade to the best usable text.
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        Self {
            title_text: first_text(fields, &TITLE_KEYS),
            description_text: first_text(fields, &DESCRIPTION_KEYS),
            date_text: first_text(fields, &DATE_KEYS),
            location_text: first_text(fields, &LOCATION_KEYS),
            url_text: first_text(fields, &URL_KEYS),
            source_name: first_text(fields, &SOURCE_KEYS),
        }
    }
}

impl<'de> Deserialize<'de> for RawExtraction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let fields = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self::from_fields(&fields))
    }
}

/// Far-future placeholder written for events whose date text did not resolve.
pub fn unresolved_sentinel() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2099, 12, 31, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Resolved start of an event. `Unresolved` sorts after every real instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StartTime {
    Resolved(DateTime<Utc>),
    Unresolved,
}

impl StartTime {
    pub fn is_resolved(&self) -> bool {
        matches!(self, StartTime::Resolved(_))
    }

    /// Instant used on the wire; unresolved maps to the sentinel.
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            StartTime::Resolved(ts) => *ts,
            StartTime::Unresolved => unresolved_sentinel(),
        }
    }
}

impl Serialize for StartTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.instant().serialize(serializer)
    }
}

/// Canonical event record. Built by the normalizer, never mutated afterwards.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Event {
    pub title: String,
    pub description: String,
    pub start_raw: String,
    pub start: StartTime,
    pub location: String,
    pub url: String,
    pub category_hint: String,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub fingerprint: Fingerprint,
}

/// Keyword rule for category hints: any keyword contained in title or
/// description selects `category`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryRule {
    pub keywords: Vec<String>,
    pub category: String,
}

/// Per-source facts the normalizer needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceProfile {
    pub name: String,
    pub url: String,
    pub default_location: String,
    pub default_category: String,
    #[serde(default)]
    pub categories: Vec<CategoryRule>,
}

impl SourceProfile {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            default_location: String::new(),
            default_category: "Community Event".to_string(),
            categories: Vec::new(),
        }
    }
}

/// One curated source. `extract` drives the shared page and returns the
/// evaluated payload untouched; the runner checks its shape.
#[async_trait::async_trait]
pub trait SourceTask: Send + Sync {
    fn profile(&self) -> &SourceProfile;

    /// Town the source belongs to (used for enable lists).
    fn town(&self) -> &str;

    async fn extract(&self, page: &dyn Page) -> Result<Value>;

    fn name(&self) -> &str {
        &self.profile().name
    }
}
