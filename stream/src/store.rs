use crate::cache::{CacheRepository, ProgressRecord};
use crate::error::StreamError;
use db::models::NewUserProgress;
use db::ConnectionPool;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Composes the cache repository with the durable relational store. Writes
/// go to the cache synchronously, then to a bounded channel drained in
/// batches by a background task; reads prefer the cache and warm it from
/// the durable store on a miss.
#[derive(Clone)]
pub struct HybridProgressStore {
    cache: CacheRepository,
    pool: ConnectionPool,
    writes: mpsc::Sender<ProgressRecord>,
    closed: Arc<AtomicBool>,
    durable_fallback_deadline: Duration,
}

impl HybridProgressStore {
    pub fn new(
        cache: CacheRepository,
        pool: ConnectionPool,
        writes: mpsc::Sender<ProgressRecord>,
        durable_fallback_deadline: Duration,
    ) -> Self {
        Self {
            cache,
            pool,
            writes,
            closed: Arc::new(AtomicBool::new(false)),
            durable_fallback_deadline,
        }
    }

    /// Writes to the cache synchronously (a cache failure is returned as
    /// an error, there is no degraded path), then tries a non-blocking
    /// enqueue onto the batch-drain channel. A full channel falls back to
    /// a synchronous durable write with a short deadline; if that also
    /// fails, the caller sees an error even though the cache copy is safe.
    pub async fn save(&self, record: ProgressRecord) -> Result<(), StreamError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::Closed);
        }

        self.cache.set(&record).await?;

        match self.writes.try_send(record.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(record)) => {
                warn!("progress write channel saturated, falling back to a synchronous durable write");
                self.write_durable_with_deadline(&record).await
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                warn!("progress write channel closed, falling back to a synchronous durable write");
                self.write_durable_with_deadline(&record).await
            }
        }
    }

    async fn write_durable_with_deadline(&self, record: &ProgressRecord) -> Result<(), StreamError> {
        let pool = self.pool.clone();
        let new_record = to_new_progress(record);
        let write = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            db::db::user_progress::upsert(&mut conn, &new_record)
        });

        match tokio::time::timeout(self.durable_fallback_deadline, write).await {
            Ok(Ok(Ok(_rows))) => Ok(()),
            Ok(Ok(Err(err))) => Err(StreamError::Db(err)),
            Ok(Err(join_err)) => {
                error!("durable fallback write task panicked: {join_err}");
                Err(StreamError::Closed)
            }
            Err(_elapsed) => {
                warn!("durable fallback write timed out; cache copy retained for the next drain");
                Err(StreamError::Closed)
            }
        }
    }

    /// Reads the cache; on a miss, reads the durable store and warms the
    /// cache in the background (the warm is best-effort and never blocks
    /// the caller or fails the read).
    pub async fn get(&self, user_id: i32, catalog_id: i32) -> Result<Option<ProgressRecord>, StreamError> {
        if let Some(record) = self.cache.get(user_id, catalog_id).await? {
            return Ok(Some(record));
        }

        let pool = self.pool.clone();
        let durable = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            db::db::user_progress::get(&mut conn, user_id, catalog_id)
        })
        .await
        .map_err(|_| StreamError::Closed)??;

        let Some(durable) = durable else {
            return Ok(None);
        };

        let record = ProgressRecord {
            user_id: durable.user_id,
            catalog_id: durable.catalog_id,
            current_chapter: durable.current_chapter,
            status: durable.status,
            page: durable.page,
            updated_at: durable.updated_at,
        };

        let cache = self.cache.clone();
        let warm = record.clone();
        tokio::spawn(async move {
            if let Err(err) = cache.set(&warm).await {
                warn!("failed to warm the cache after a durable hit: {err}");
            }
        });

        Ok(Some(record))
    }

    pub async fn delete(&self, user_id: i32, catalog_id: i32) -> Result<(), StreamError> {
        self.cache.delete(user_id, catalog_id).await
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

fn to_new_progress(record: &ProgressRecord) -> NewUserProgress {
    NewUserProgress {
        user_id: record.user_id,
        catalog_id: record.catalog_id,
        current_chapter: record.current_chapter,
        status: record.status.clone(),
        page: record.page,
        updated_at: record.updated_at,
    }
}

/// The batch drainer: consumes the write channel, accumulating up to
/// `batch_size` records or until `flush_interval` elapses, then upserts
/// the batch in one transaction. On cancellation it flushes whatever is
/// buffered once and exits.
pub async fn run_batch_drainer(
    mut receiver: mpsc::Receiver<ProgressRecord>,
    pool: ConnectionPool,
    batch_size: usize,
    flush_interval: Duration,
    cancel: CancellationToken,
) {
    let mut buffer = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                flush(&pool, &mut buffer).await;
                info!("progress batch drainer cancelled, final flush complete");
                return;
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&pool, &mut buffer).await;
                }
            }
            record = receiver.recv() => match record {
                Some(record) => {
                    buffer.push(record);
                    if buffer.len() >= batch_size {
                        flush(&pool, &mut buffer).await;
                    }
                }
                None => {
                    flush(&pool, &mut buffer).await;
                    info!("progress write channel closed, batch drainer exiting");
                    return;
                }
            },
        }
    }
}

/// Upserts the whole buffer in one transaction, clearing it regardless of
/// outcome: a failed durable write is logged, the cache retains the
/// record, and a later `save` for the same key re-queues it.
async fn flush(pool: &ConnectionPool, buffer: &mut Vec<ProgressRecord>) {
    if buffer.is_empty() {
        return;
    }

    let batch = std::mem::take(buffer);
    let pool = pool.clone();
    let count = batch.len();

    let result = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            for record in &batch {
                db::db::user_progress::upsert(conn, &to_new_progress(record))?;
            }
            Ok(())
        })
    })
    .await;

    match result {
        Ok(Ok(())) => info!("progress batch drainer flushed {count} records"),
        Ok(Err(err)) => error!("progress batch drainer failed to flush {count} records: {err}"),
        Err(join_err) => error!("progress batch drainer flush task panicked: {join_err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use diesel::prelude::*;
    use diesel::sql_types::Int4;

    async fn test_pool() -> db::ConnectionPool {
        db::migrations::run_migrations().expect("failed to run migrations");
        db::get_pool(3).expect("failed to build a connection pool")
    }

    fn test_cache() -> CacheRepository {
        CacheRepository::new("redis://127.0.0.1/", 1).expect("failed to build the cache repository")
    }

    /// With the write channel already full, `save` must fall through to the
    /// synchronous durable write rather than silently dropping the update.
    #[tokio::test]
    async fn save_falls_back_to_a_durable_write_when_the_channel_is_saturated() {
        let pool = test_pool().await;
        let cache = test_cache();

        let (tx, rx) = mpsc::channel(1);
        tx.try_send(ProgressRecord {
            user_id: -1,
            catalog_id: -1,
            current_chapter: 0,
            status: "reading".to_string(),
            page: None,
            updated_at: Utc::now(),
        })
        .expect("priming send to fill the channel should succeed");

        let store = HybridProgressStore::new(cache, pool.clone(), tx, Duration::from_millis(500));

        let user_id = 900_101;
        let catalog_id = 900_102;
        let record = ProgressRecord {
            user_id,
            catalog_id,
            current_chapter: 12,
            status: "reading".to_string(),
            page: Some(3),
            updated_at: Utc::now(),
        };

        store
            .save(record.clone())
            .await
            .expect("save should fall back to a synchronous durable write");

        let mut conn = pool.get().expect("failed to get a connection");
        let stored = db::db::user_progress::get(&mut conn, user_id, catalog_id)
            .expect("failed to query user_progress")
            .expect("the durable fallback should have written the row");
        assert_eq!(stored.current_chapter, 12);
        assert_eq!(stored.page, Some(3));

        let _ = diesel::sql_query("delete from user_progress where user_id = $1 and catalog_id = $2")
            .bind::<Int4, _>(user_id)
            .bind::<Int4, _>(catalog_id)
            .execute(&mut conn);

        drop(rx);
    }
}
