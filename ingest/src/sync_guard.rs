use crate::error::IngestError;
use chrono::Utc;
use db::db::sync_state;
use db::ConnectionPool;
use log::{error, info};
use std::future::Future;

/// Shared `idle -> running -> {completed|error}` guard for the three
/// ingest workflows: acquires the sync_state row (no-op if another runner
/// already holds `running`), runs `work`, and writes the terminal status
/// with the cursor `work` returns.
pub async fn run_guarded<F, Fut>(
    pool: &ConnectionPool,
    sync_type: &'static str,
    work: F,
) -> Result<(), IngestError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String, IngestError>>,
{
    {
        let mut conn = pool.get()?;
        if sync_state::try_start(&mut conn, sync_type, Utc::now())?.is_none() {
            info!("{sync_type} sync is already running, skipping this tick");
            return Ok(());
        }
    }

    match work().await {
        Ok(cursor) => {
            let mut conn = pool.get()?;
            sync_state::mark_completed(&mut conn, sync_type, &cursor, Utc::now())?;
            info!("{sync_type} sync completed, cursor={cursor}");
            Ok(())
        }
        Err(err) => {
            let mut conn = pool.get()?;
            if let Err(db_err) = sync_state::mark_error(&mut conn, sync_type, &err.to_string()) {
                error!("failed to record {sync_type} sync failure: {db_err}");
            }
            error!("{sync_type} sync failed: {err}");
            Err(err)
        }
    }
}
