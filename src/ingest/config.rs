// src/ingest/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::sources::{Extract, SourceDef};

const ENV_CONFIG_PATH: &str = "HARVEST_CONFIG_PATH";
const ENV_SOURCES_PATH: &str = "HARVEST_SOURCES_PATH";

/// Hard ceiling for `max_events`, whatever the input says.
pub const MAX_EVENTS_CAP: usize = 1000;

fn default_max_events() -> usize {
    500
}
fn default_true() -> bool {
    true
}
fn default_source_timeout_secs() -> u64 {
    60
}
fn default_source_delay_ms() -> u64 {
    2_000
}

/// Run input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_max_events", alias = "maxEvents")]
    pub max_events: usize,
    /// Enabled towns or source names; empty enables everything.
    #[serde(default, alias = "sources")]
    pub towns: Vec<String>,
    #[serde(default = "default_true", alias = "futureOnly")]
    pub future_only: bool,
    #[serde(default = "default_source_timeout_secs", alias = "sourceTimeoutSecs")]
    pub source_timeout_secs: u64,
    #[serde(default = "default_source_delay_ms", alias = "sourceDelayMs")]
    pub source_delay_ms: u64,
    #[serde(default, alias = "utcOffsetHours")]
    pub utc_offset_hours: i32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            debug: false,
            max_events: default_max_events(),
            towns: Vec::new(),
            future_only: true,
            source_timeout_secs: default_source_timeout_secs(),
            source_delay_ms: default_source_delay_ms(),
            utc_offset_hours: 0,
        }
    }
}

impl RunConfig {
    /// Clamp and clean user input.
    pub fn sanitized(mut self) -> Self {
        self.max_events = self.max_events.clamp(1, MAX_EVENTS_CAP);
        self.towns = clean_list(self.towns);
        if self.source_timeout_secs == 0 {
            self.source_timeout_secs = default_source_timeout_secs();
        }
        if !(-23..=23).contains(&self.utc_offset_hours) {
            self.utc_offset_hours = 0;
        }
        self
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn source_delay(&self) -> Duration {
        Duration::from_millis(self.source_delay_ms)
    }
}

/// Case-insensitive match of a source against the enable list (town or
/// source name). An empty list enables everything.
pub fn is_enabled(town: &str, name: &str, enabled: &[String]) -> bool {
    enabled.is_empty()
        || enabled
            .iter()
            .any(|w| w.eq_ignore_ascii_case(town) || w.eq_ignore_ascii_case(name))
}

fn ext_of(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Load run input from an explicit path (TOML or JSON).
pub fn load_run_config_from(path: &Path) -> Result<RunConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading run config from {}", path.display()))?;
    let cfg: RunConfig = if ext_of(path) == "json" {
        serde_json::from_str(&content).context("parsing run config json")?
    } else {
        toml::from_str(&content).context("parsing run config toml")?
    };
    Ok(cfg.sanitized())
}

/// Run input via env var + fallbacks:
/// 1) $HARVEST_CONFIG_PATH
/// 2) config/harvest.toml
/// 3) config/harvest.json
/// 4) defaults
pub fn load_run_config_default() -> Result<RunConfig> {
    match find_config(ENV_CONFIG_PATH, "harvest")? {
        Some(p) => load_run_config_from(&p),
        None => Ok(RunConfig::default()),
    }
}

#[derive(Deserialize)]
struct Catalog {
    sources: Vec<SourceDef>,
}

/// Load the source catalogue from an explicit path (TOML or JSON).
pub fn load_sources_from(path: &Path) -> Result<Vec<SourceDef>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading source catalogue from {}", path.display()))?;
    let catalog: Catalog = if ext_of(path) == "json" {
        serde_json::from_str(&content).context("parsing source catalogue json")?
    } else {
        toml::from_str(&content).context("parsing source catalogue toml")?
    };
    validate_sources(&catalog.sources)?;
    Ok(catalog.sources)
}

/// Source catalogue via $HARVEST_SOURCES_PATH, config/sources.toml,
/// config/sources.json. Unlike run input, a catalogue is required.
pub fn load_sources_default() -> Result<Vec<SourceDef>> {
    match find_config(ENV_SOURCES_PATH, "sources")? {
        Some(p) => load_sources_from(&p),
        None => Err(anyhow!(
            "no source catalogue: set {ENV_SOURCES_PATH} or add config/sources.toml"
        )),
    }
}

fn find_config(env_key: &str, stem: &str) -> Result<Option<PathBuf>> {
    if let Ok(p) = std::env::var(env_key) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Ok(Some(pb));
        }
        return Err(anyhow!("{env_key} points to non-existent path"));
    }
    for ext in ["toml", "json"] {
        let p = PathBuf::from(format!("config/{stem}.{ext}"));
        if p.exists() {
            return Ok(Some(p));
        }
    }
    Ok(None)
}

fn validate_sources(sources: &[SourceDef]) -> Result<()> {
    use std::collections::HashSet;
    let mut names = HashSet::new();
    for s in sources {
        let name = s.profile.name.trim();
        if name.is_empty() {
            bail!("source with empty name");
        }
        if !names.insert(name.to_ascii_lowercase()) {
            bail!("duplicate source name: {name}");
        }
        if s.profile.url.trim().is_empty() {
            bail!("source {name} has no url");
        }
        let body = match &s.extract {
            Extract::Script(e) | Extract::Blocks(e) => e,
        };
        if body.trim().is_empty() {
            bail!("source {name} has an empty extract rule");
        }
    }
    Ok(())
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    use std::collections::BTreeSet;
    let mut set = BTreeSet::new();
    for it in items {
        let t = it.trim();
        if !t.is_empty() {
            set.insert(t.to_string());
        }
    }
    set.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_input_with_camel_case_is_clamped() {
        let cfg: RunConfig =
            serde_json::from_str(r#"{"maxEvents": 5000, "futureOnly": false, "towns": [" Maple ", "", "Maple"]}"#)
                .unwrap();
        let cfg = cfg.sanitized();
        assert_eq!(cfg.max_events, MAX_EVENTS_CAP);
        assert!(!cfg.future_only);
        assert_eq!(cfg.towns, vec!["Maple".to_string()]);
        assert_eq!(cfg.source_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn enable_list_matches_town_or_name() {
        let wl = vec!["maple".to_string(), "Oak Grange".to_string()];
        assert!(is_enabled("Maple", "Maple Library", &wl));
        assert!(is_enabled("Oakdale", "OAK GRANGE", &wl));
        assert!(!is_enabled("Birch", "Birch Hall", &wl));
        assert!(is_enabled("Birch", "Birch Hall", &[]));
    }

    #[test]
    fn duplicate_source_names_rejected() {
        let toml = r#"
[[sources]]
name = "A"
town = "T"
url = "https://a.example"
default_location = ""
default_category = "General"
extract = { script = "[]" }

[[sources]]
name = "a"
town = "T"
url = "https://b.example"
default_location = ""
default_category = "General"
extract = { script = "[]" }
"#;
        let cat: Catalog = toml::from_str(toml).unwrap();
        assert!(validate_sources(&cat.sources).is_err());
    }
}
