// src/ingest/runner.rs
use anyhow::{anyhow, Result};
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::browser::Page;
use crate::ingest::types::{RawExtraction, SourceTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Success,
    Error,
}

/// What happened to one source during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceOutcome {
    pub name: String,
    pub status: SourceStatus,
    /// Events kept for this source after normalization and filtering.
    pub count: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceOutcome {
    pub fn is_success(&self) -> bool {
        self.status == SourceStatus::Success
    }
}

/// Raw extractions of one source plus its outcome.
#[derive(Debug, Clone)]
pub struct SourceRun {
    pub raws: Vec<RawExtraction>,
    /// List items that could not be read as a record at all.
    pub unusable: usize,
    pub outcome: SourceOutcome,
}

/// Records read from one extraction payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPayload {
    pub raws: Vec<RawExtraction>,
    pub unusable: usize,
}

/// Turn an extraction payload into raw records. Anything but a JSON array is
/// an error. Object items are read leniently; other items are counted as
/// unusable.
pub fn parse_payload(source: &str, payload: Value) -> Result<ParsedPayload> {
    let items = match payload {
        Value::Array(items) => items,
        other => {
            return Err(anyhow!(
                "invalid data type: expected a list, got {}",
                json_kind(&other)
            ))
        }
    };

    let mut parsed = ParsedPayload {
        raws: Vec::with_capacity(items.len()),
        unusable: 0,
    };
    for (idx, item) in items.iter().enumerate() {
        match item.as_object() {
            Some(fields) => parsed.raws.push(RawExtraction::from_fields(fields)),
            None => {
                tracing::warn!(target: "ingest", source, idx, kind = json_kind(item), "unusable list item");
                parsed.unusable += 1;
            }
        }
    }
    Ok(parsed)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Runs one source under a hard wall-clock limit.
#[derive(Debug, Clone, Copy)]
pub struct SourceRunner {
    timeout: Duration,
}

impl SourceRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Never fails: errors, timeouts and bad payloads all come back as an
    /// `Error` outcome with zero raws.
    ///
    /// On timeout the extraction future is dropped, which cancels our side of
    /// any in-flight request. Work already handed to the rendering service
    /// may still finish there; its result is ignored.
    pub async fn run(&self, task: &dyn SourceTask, page: &dyn Page) -> SourceRun {
        let name = task.name().to_string();
        let t0 = Instant::now();

        let result = match tokio::time::timeout(self.timeout, task.extract(page)).await {
            Ok(Ok(payload)) => parse_payload(&name, payload),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(anyhow!("timed out after {} ms", self.timeout.as_millis())),
        };

        let duration_ms = t0.elapsed().as_millis() as u64;
        histogram!("harvest_source_ms").record(duration_ms as f64);

        match result {
            Ok(ParsedPayload { raws, unusable }) => {
                tracing::info!(target: "ingest", source = %name, raws = raws.len(), unusable, duration_ms, "source extracted");
                SourceRun {
                    unusable,
                    outcome: SourceOutcome {
                        name,
                        status: SourceStatus::Success,
                        count: raws.len(),
                        duration_ms,
                        error: None,
                    },
                    raws,
                }
            }
            Err(e) => {
                tracing::warn!(target: "ingest", source = %name, error = ?e, duration_ms, "source failed");
                counter!("harvest_source_errors_total").increment(1);
                SourceRun {
                    raws: Vec::new(),
                    unusable: 0,
                    outcome: SourceOutcome {
                        name,
                        status: SourceStatus::Error,
                        count: 0,
                        duration_ms,
                        error: Some(format!("{e:#}")),
                    },
                }
            }
        }
    }
}
