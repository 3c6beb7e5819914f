//! Harvest entrypoint: one run across all enabled sources, then exit.
//!
//! Exit status is non-zero only when the run could not proceed at all
//! (no catalogue, no rendering service, run store unwritable).

use anyhow::{Context, Result};
use std::sync::Arc;

use community_events_sync::browser::BrowserlessBrowser;
use community_events_sync::ingest::config::{load_run_config_default, load_sources_default};
use community_events_sync::ingest::sources::CatalogSource;
use community_events_sync::ingest::types::SourceTask;
use community_events_sync::{init_tracing, FileRunStore, Harvester, SyncClient};

const DEFAULT_BROWSERLESS_URL: &str = "http://localhost:3000";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let config = load_run_config_default().context("loading run config")?;
    init_tracing(config.debug);

    let sources: Vec<Box<dyn SourceTask>> = load_sources_default()
        .context("loading source catalogue")?
        .into_iter()
        .map(|def| Box::new(CatalogSource::new(def)) as Box<dyn SourceTask>)
        .collect();

    let sync = SyncClient::from_env();
    if sync.is_none() {
        tracing::warn!("AIRTABLE_TOKEN / AIRTABLE_BASE_ID not set; events will not be synced");
    }

    let harvester = Harvester::new(config, sources, Arc::new(FileRunStore::from_env()), sync);

    let url = std::env::var("BROWSERLESS_URL").unwrap_or_else(|_| DEFAULT_BROWSERLESS_URL.into());
    let token = std::env::var("BROWSERLESS_TOKEN").ok();
    let browser = match BrowserlessBrowser::connect(&url, token.as_deref())
        .await
        .with_context(|| format!("connecting to rendering service at {url}"))
    {
        Ok(b) => b,
        Err(e) => {
            harvester.record_fatal(&e).await;
            return Err(e);
        }
    };

    let summary = harvester.run(&browser).await?;
    tracing::info!(
        found = summary.total_found,
        kept = summary.total_after_filtering,
        sync = ?summary.sync.status,
        "done"
    );
    Ok(())
}
