use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info};

use crate::{
    AppState,
    modules::{comments, media_kit},
};

const CLEANUP_INTERVAL_MINUTES: u64 = 15;

pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(CLEANUP_INTERVAL_MINUTES * 60);
        loop {
            if let Err(err) = run_cleanup_cycle(&state).await {
                error!(?err, "maintenance cycle failed");
            }
            sleep(interval).await;
        }
    });
}

async fn run_cleanup_cycle(state: &AppState) -> Result<()> {
    let now = Utc::now();

    let windows_pruned = state.gate().limiter().prune(Instant::now());
    debug!(
        windows_pruned,
        tracked = state.gate().limiter().tracked_keys(),
        "pruned admin attempt windows"
    );

    let comments_purged = comments::purge_expired(state.pool(), now)
        .await
        .context("failed to purge soft-deleted comments")?;

    let tokens_purged = media_kit::purge_stale_tokens(state.pool(), now)
        .await
        .context("failed to purge expired media kit tokens")?;

    if comments_purged > 0 || tokens_purged > 0 {
        info!(comments_purged, tokens_purged, "maintenance cleanup completed");
    }

    Ok(())
}
