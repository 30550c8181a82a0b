use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};
use url::Url;

use crate::cli::telemetry;
use crate::config::FilterOptions;
use crate::filter::AuthFlowFilter;
use crate::gate::{self, AppState};
use crate::observe::TracingObserver;
use crate::session::MemorySessionStore;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub config: PathBuf,
    pub challenge_url: Url,
    pub session_ttl: Duration,
    pub remote_timeout: Duration,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the filter options cannot be loaded or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let options = FilterOptions::from_file(&args.config)?;
    debug!("loaded filter options from {}", args.config.display());

    let filter = AuthFlowFilter::new(
        options,
        Arc::new(MemorySessionStore::new(args.session_ttl)),
        Arc::new(TracingObserver),
    )
    .context("Failed to build the filter")?
    .with_remote_timeout(args.remote_timeout);

    if !filter.is_active() {
        warn!("filter is inert, every request will continue without a second factor");
    }

    let state = Arc::new(AppState::new(filter, args.challenge_url));
    let result = gate::new(args.port, state).await;

    telemetry::shutdown_tracer();

    result
}
