// src/lib.rs
// Public library surface for the harvest binary and integration tests.

pub mod browser;
pub mod ingest;
pub mod sync;

// ---- Re-exports for stable public API ----
pub use crate::ingest::summary::{FileRunStore, RunStore, RunSummary};
pub use crate::ingest::types::{Event, RawExtraction, StartTime};
pub use crate::ingest::Harvester;
pub use crate::sync::{SyncClient, SyncReport};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins; otherwise `debug` picks
/// between debug and info for this crate.
pub fn init_tracing(debug: bool) {
    let fallback = if debug {
        "community_events_sync=debug,ingest=debug,sync=debug,info"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}
