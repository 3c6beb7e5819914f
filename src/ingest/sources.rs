//! Catalogue-driven source tasks.
//!
//! Every curated source either ships an extraction expression that returns a
//! list of event objects (`script`), or names a selector whose text blocks are
//! split into fields here (`blocks`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browser::Page;
use crate::ingest::dates::find_date_text;
use crate::ingest::types::{RawExtraction, SourceProfile, SourceTask};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Extract {
    /// JS expression evaluating to an array of event objects.
    Script(String),
    /// CSS selector; each match is one event's text block.
    Blocks(String),
}

/// One catalogue entry as written in `config/sources.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceDef {
    #[serde(flatten)]
    pub profile: SourceProfile,
    pub town: String,
    #[serde(default)]
    pub wait_for: Option<String>,
    pub extract: Extract,
}

pub struct CatalogSource {
    def: SourceDef,
}

impl CatalogSource {
    pub fn new(def: SourceDef) -> Self {
        Self { def }
    }
}

#[async_trait::async_trait]
impl SourceTask for CatalogSource {
    fn profile(&self) -> &SourceProfile {
        &self.def.profile
    }

    fn town(&self) -> &str {
        &self.def.town
    }

    async fn extract(&self, page: &dyn Page) -> Result<Value> {
        let url = &self.def.profile.url;
        page.goto(url, self.def.wait_for.as_deref())
            .await
            .with_context(|| format!("navigating to {url}"))?;

        match &self.def.extract {
            Extract::Script(expression) => page
                .evaluate(expression)
                .await
                .context("evaluating extraction script"),
            Extract::Blocks(selector) => {
                let blocks = page
                    .texts(selector)
                    .await
                    .with_context(|| format!("reading blocks for {selector}"))?;
                let raws: Vec<RawExtraction> = blocks
                    .iter()
                    .map(|b| split_text_block(b, &self.def.profile.name))
                    .collect();
                Ok(serde_json::to_value(raws)?)
            }
        }
    }
}

const LOCATION_PREFIXES: [&str; 4] = ["location:", "where:", "place:", "venue:"];

/// Split one visible text block into raw fields: first line is the title,
/// the first date-looking line is the date, a `Location:`/`Where:` line is the
/// location, everything else is description.
pub fn split_text_block(block: &str, source: &str) -> RawExtraction {
    let lines: Vec<&str> = block
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut raw = RawExtraction {
        source_name: Some(source.to_string()),
        ..Default::default()
    };
    let Some((title, rest)) = lines.split_first() else {
        return raw;
    };
    raw.title_text = Some(title.to_string());

    let mut description = Vec::new();
    for line in rest {
        let lower = line.to_ascii_lowercase();
        if raw.location_text.is_none() {
            if let Some(prefix) = LOCATION_PREFIXES.iter().find(|p| lower.starts_with(*p)) {
                raw.location_text = Some(line[prefix.len()..].trim().to_string());
                continue;
            }
        }
        if raw.date_text.is_none() && find_date_text(line).is_some() {
            raw.date_text = Some(line.to_string());
            continue;
        }
        description.push(*line);
    }
    if !description.is_empty() {
        raw.description_text = Some(description.join("\n"));
    }
    raw
}
