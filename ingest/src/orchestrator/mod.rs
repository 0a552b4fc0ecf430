pub mod chapter_check;
pub mod initial_sync;
pub mod new_manga_poll;

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::pool::WorkerPool;
use db::ConnectionPool;
use log::error;
use notify::EventGateway;
use provider::ProviderClient;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs the three ingestion workflows on their own ticks until
/// cancelled: a one-time initial bulk import, a new-manga poll on
/// `new_manga_poll_cadence_hours`, and a chapter-update poll on
/// `chapter_check_cadence_hours`. Each tick's errors are logged and do
/// not stop the scheduler; the next tick tries again.
pub async fn run_scheduler(
    pool: ConnectionPool,
    client: ProviderClient,
    gateway: EventGateway,
    cfg: IngestConfig,
    cancel: CancellationToken,
) {
    let mut worker_pool = WorkerPool::new(cfg.worker_pool.worker_count);

    if let Err(err) = initial_sync::run(pool.clone(), &client, &worker_pool, &cfg).await {
        error!("initial bulk import failed: {err}");
    }

    let new_manga_interval = Duration::from_secs(cfg.new_manga_poll_cadence_hours.max(1) as u64 * 3600);
    let chapter_check_interval = Duration::from_secs(cfg.chapter_check_cadence_hours.max(1) as u64 * 3600);

    let mut new_manga_ticker = tokio::time::interval(new_manga_interval);
    let mut chapter_check_ticker = tokio::time::interval(chapter_check_interval);
    new_manga_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    chapter_check_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = new_manga_ticker.tick() => {
                if let Err(err) = new_manga_poll::run(pool.clone(), &client, &gateway, &worker_pool, &cfg).await {
                    error!("new-manga poll failed: {err}");
                }
            }
            _ = chapter_check_ticker.tick() => {
                if let Err(err) = chapter_check::run(pool.clone(), &client, &gateway, &worker_pool, &cfg).await {
                    error!("chapter-check poll failed: {err}");
                }
            }
        }
    }

    worker_pool.shutdown().await;
}
