//! Record store seam and its Airtable implementation.

use reqwest::{header::RETRY_AFTER, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::ingest::normalize::{
    truncate_chars, MAX_CATEGORY, MAX_DESCRIPTION, MAX_LOCATION, MAX_TITLE, MAX_URL,
};
use crate::ingest::types::Event;

pub const DEFAULT_TABLE: &str = "RawEvents";
pub const DEFAULT_API_URL: &str = "https://api.airtable.com/v0";

/// Columns the target table must carry.
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "source_name",
    "title_raw",
    "description_raw",
    "start_raw",
    "location_raw",
    "url_raw",
    "category_hint",
    "fetched_at",
    "hash",
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("request rejected (status {status}): {message}")]
    Client { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("schema check failed: {0}")]
    Schema(String),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::Network(err.to_string())
        }
    }
}

impl StoreError {
    /// Map a non-success status to the matching variant.
    pub fn from_status(status: u16, retry_after: Option<Duration>, message: String) -> Self {
        match status {
            429 => StoreError::RateLimited { retry_after },
            500..=599 => StoreError::Server { status, message },
            _ => StoreError::Client { status, message },
        }
    }
}

/// One row of the events table, column names as in the base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreRow {
    pub source_name: String,
    pub title_raw: String,
    pub description_raw: String,
    pub start_raw: String,
    pub location_raw: String,
    pub url_raw: String,
    pub category_hint: String,
    pub fetched_at: String,
    pub hash: String,
}

impl From<&Event> for StoreRow {
    fn from(ev: &Event) -> Self {
        Self {
            source_name: ev.source.clone(),
            title_raw: truncate_chars(&ev.title, MAX_TITLE),
            description_raw: truncate_chars(&ev.description, MAX_DESCRIPTION),
            start_raw: ev.start_raw.clone(),
            location_raw: truncate_chars(&ev.location, MAX_LOCATION),
            url_raw: truncate_chars(&ev.url, MAX_URL),
            category_hint: truncate_chars(&ev.category_hint, MAX_CATEGORY),
            fetched_at: ev.fetched_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            hash: ev.fingerprint.to_string(),
        }
    }
}

/// One page of existing record ids and the token for the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPage {
    pub ids: Vec<String>,
    pub offset: Option<String>,
}

#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn verify_schema(&self) -> Result<(), StoreError>;

    async fn list_page(&self, offset: Option<&str>) -> Result<RecordPage, StoreError>;

    /// Returns how many records the store reports deleted.
    async fn delete(&self, ids: &[String]) -> Result<usize, StoreError>;

    /// Returns how many records the store reports created.
    async fn create(&self, rows: &[StoreRow]) -> Result<usize, StoreError>;
}

/// Credentials and addressing for an Airtable base.
#[derive(Debug, Clone)]
pub struct StoreCredentials {
    pub token: String,
    pub base_id: String,
    pub table: String,
    pub api_url: String,
}

impl StoreCredentials {
    /// `None` when `AIRTABLE_TOKEN` or `AIRTABLE_BASE_ID` is missing or blank.
    pub fn from_env() -> Option<Self> {
        let token = non_blank_env("AIRTABLE_TOKEN")?;
        let base_id = non_blank_env("AIRTABLE_BASE_ID")?;
        Some(Self {
            token,
            base_id,
            table: non_blank_env("AIRTABLE_TABLE").unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            api_url: non_blank_env("AIRTABLE_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        })
    }
}

fn non_blank_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub struct AirtableStore {
    client: reqwest::Client,
    creds: StoreCredentials,
}

#[derive(Deserialize)]
struct ListResp {
    records: Vec<IdOnly>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
struct DeleteResp {
    records: Vec<Deleted>,
}

#[derive(Deserialize)]
struct Deleted {
    #[serde(default)]
    deleted: bool,
}

#[derive(Serialize)]
struct CreateReq<'a> {
    records: Vec<CreateRecord<'a>>,
    typecast: bool,
}

#[derive(Serialize)]
struct CreateRecord<'a> {
    fields: &'a StoreRow,
}

#[derive(Deserialize)]
struct MetaTables {
    tables: Vec<MetaTable>,
}

#[derive(Deserialize)]
struct MetaTable {
    name: String,
    fields: Vec<MetaField>,
}

#[derive(Deserialize)]
struct MetaField {
    name: String,
}

impl AirtableStore {
    pub fn new(creds: StoreCredentials) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .user_agent("community-events-sync/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, creds })
    }

    fn table_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.creds.api_url.trim_end_matches('/'),
            self.creds.base_id,
            self.creds.table
        )
    }

    fn meta_url(&self) -> String {
        format!(
            "{}/meta/bases/{}/tables",
            self.creds.api_url.trim_end_matches('/'),
            self.creds.base_id
        )
    }

    async fn check(resp: Response) -> Result<Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
            resp.headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        } else {
            None
        };
        let message = resp.text().await.unwrap_or_default();
        Err(StoreError::from_status(status.as_u16(), retry_after, message))
    }
}

#[async_trait::async_trait]
impl RecordStore for AirtableStore {
    async fn verify_schema(&self) -> Result<(), StoreError> {
        let resp = self
            .client
            .get(self.meta_url())
            .bearer_auth(&self.creds.token)
            .send()
            .await?;
        let meta: MetaTables = Self::check(resp).await?.json().await?;

        let table = meta
            .tables
            .iter()
            .find(|t| t.name == self.creds.table)
            .ok_or_else(|| StoreError::Schema(format!("table {} not found", self.creds.table)))?;
        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !table.fields.iter().any(|f| f.name == *c))
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::Schema(format!(
                "table {} lacks columns: {}",
                self.creds.table,
                missing.join(", ")
            )));
        }
        Ok(())
    }

    async fn list_page(&self, offset: Option<&str>) -> Result<RecordPage, StoreError> {
        let mut query: Vec<(&str, &str)> = vec![("pageSize", "100"), ("fields[]", "hash")];
        if let Some(o) = offset {
            query.push(("offset", o));
        }
        let resp = self
            .client
            .get(self.table_url())
            .bearer_auth(&self.creds.token)
            .query(&query)
            .send()
            .await?;
        let body: ListResp = Self::check(resp).await?.json().await?;
        Ok(RecordPage {
            ids: body.records.into_iter().map(|r| r.id).collect(),
            offset: body.offset.filter(|o| !o.is_empty()),
        })
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, StoreError> {
        let query: Vec<(&str, &str)> = ids.iter().map(|id| ("records[]", id.as_str())).collect();
        let resp = self
            .client
            .delete(self.table_url())
            .bearer_auth(&self.creds.token)
            .query(&query)
            .send()
            .await?;
        let body: DeleteResp = Self::check(resp).await?.json().await?;
        Ok(body.records.iter().filter(|r| r.deleted).count())
    }

    async fn create(&self, rows: &[StoreRow]) -> Result<usize, StoreError> {
        let req = CreateReq {
            records: rows.iter().map(|fields| CreateRecord { fields }).collect(),
            typecast: true,
        };
        let resp = self
            .client
            .post(self.table_url())
            .bearer_auth(&self.creds.token)
            .json(&req)
            .send()
            .await?;
        let body: ListResp = Self::check(resp).await?.json().await?;
        Ok(body.records.len())
    }
}
