//! Raw extraction → canonical [`Event`].
//!
//! Normalization is total over [`RawExtraction`]: oversized fields are cut,
//! missing ones defaulted. The only rejection is an empty title.

use chrono::{DateTime, Utc};
use reqwest::Url;

use crate::ingest::dates::DateResolver;
use crate::ingest::fingerprint::fingerprint;
use crate::ingest::types::{Event, RawExtraction, SourceProfile};
use crate::ingest::clean_text;

pub const MAX_TITLE: usize = 150;
pub const MAX_DESCRIPTION: usize = 2000;
pub const MAX_LOCATION: usize = 500;
pub const MAX_URL: usize = 1000;
pub const MAX_CATEGORY: usize = 255;

pub const TRUNCATION_MARKER: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    EmptyTitle,
}

impl std::fmt::Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejected::EmptyTitle => f.write_str("empty title"),
        }
    }
}

/// Cut `s` to at most `max` chars.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

/// Cut `s` to at most `max` chars, ending with [`TRUNCATION_MARKER`] when cut.
pub fn truncate_with_marker(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(TRUNCATION_MARKER.chars().count());
    let mut out: String = s.chars().take(keep).collect();
    out.truncate(out.trim_end().len());
    out.push_str(TRUNCATION_MARKER);
    out
}

/// First rule with a keyword contained in title or description wins.
pub fn category_for(profile: &SourceProfile, title: &str, description: &str) -> String {
    let haystack = format!("{title} {description}").to_lowercase();
    let hit = profile.categories.iter().find(|rule| {
        rule.keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .any(|k| !k.is_empty() && haystack.contains(&k))
    });
    let category = match hit {
        Some(rule) => rule.category.as_str(),
        None => profile.default_category.as_str(),
    };
    truncate_chars(category.trim(), MAX_CATEGORY)
}

/// Absolute link for `raw`; relative links are joined onto the source page.
fn absolute_url(raw: &str, base: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    match Url::parse(raw) {
        Ok(u) => u.to_string(),
        Err(_) => Url::parse(base)
            .and_then(|b| b.join(raw))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| raw.to_string()),
    }
}

/// Normalizes extractions for a single source within one run.
pub struct EventNormalizer<'a> {
    profile: &'a SourceProfile,
    resolver: DateResolver,
    now: DateTime<Utc>,
}

impl<'a> EventNormalizer<'a> {
    pub fn new(profile: &'a SourceProfile, resolver: DateResolver, now: DateTime<Utc>) -> Self {
        Self {
            profile,
            resolver,
            now,
        }
    }

    pub fn normalize(&self, raw: &RawExtraction) -> Result<Event, Rejected> {
        let title = clean_text(raw.title_text.as_deref().unwrap_or_default());
        if title.is_empty() {
            return Err(Rejected::EmptyTitle);
        }
        let title = truncate_chars(&title, MAX_TITLE);

        let description = clean_text(raw.description_text.as_deref().unwrap_or_default());
        let description = truncate_with_marker(&description, MAX_DESCRIPTION);

        let start_raw = raw.date_text.as_deref().unwrap_or_default().trim().to_string();
        let start = self.resolver.resolve(&start_raw, self.now);

        let location = clean_text(raw.location_text.as_deref().unwrap_or_default());
        let location = if location.is_empty() {
            self.profile.default_location.trim().to_string()
        } else {
            location
        };
        let location = truncate_chars(&location, MAX_LOCATION);

        let url = absolute_url(
            raw.url_text.as_deref().unwrap_or_default(),
            &self.profile.url,
        );
        let url = truncate_chars(&url, MAX_URL);

        let category_hint = category_for(self.profile, &title, &description);

        // Source identity comes from the catalogue, not the page.
        let source = self.profile.name.trim().to_string();
        let fingerprint = fingerprint(&title, &start_raw, &description, &source);

        Ok(Event {
            title,
            description,
            start_raw,
            start,
            location,
            url,
            category_hint,
            source,
            fetched_at: self.now,
            fingerprint,
        })
    }

    /// Normalize a batch, returning events plus the number rejected.
    pub fn normalize_all(&self, raws: &[RawExtraction]) -> (Vec<Event>, usize) {
        let mut rejected = 0usize;
        let mut out = Vec::with_capacity(raws.len());
        for raw in raws {
            match self.normalize(raw) {
                Ok(ev) => out.push(ev),
                Err(reason) => {
                    rejected += 1;
                    tracing::debug!(
                        target: "ingest",
                        source = %self.profile.name,
                        %reason,
                        date = raw.date_text.as_deref().unwrap_or_default(),
                        "extraction rejected"
                    );
                }
            }
        }
        (out, rejected)
    }
}
