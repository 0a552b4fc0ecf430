use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::pool::WorkerPool;
use crate::sync_guard::run_guarded;
use crate::util::slugify;
use chrono::Utc;
use db::db::sync_state;
use db::models::{NewCatalogEntry, SyncStatus};
use db::ConnectionPool;
use log::{info, warn};
use provider::model::{parse_chapter_number, RawCatalogEntry};
use provider::ProviderClient;
use uuid::Uuid;

const SYNC_TYPE: &str = "initial";
const PAGE_SIZE: u32 = 100;

/// Fetches the first `initial_sync_count` entries in pages of 100 and
/// persists each through the worker pool. No chapters are fetched; only
/// entries observed from here on ever get their chapters imported. A
/// no-op if the `initial` sync_state row already reads `completed`.
pub async fn run(
    pool: ConnectionPool,
    client: &ProviderClient,
    worker_pool: &WorkerPool,
    cfg: &IngestConfig,
) -> Result<(), IngestError> {
    {
        let mut conn = pool.get()?;
        if let Some(existing) = sync_state::get(&mut conn, SYNC_TYPE)?
            && existing.status == SyncStatus::Completed.to_string()
        {
            info!("initial bulk import already completed, skipping");
            return Ok(());
        }
    }

    let target = cfg.initial_sync_count;

    run_guarded(&pool, SYNC_TYPE, || async move {
        let (done_tx, mut done_rx) = tokio::sync::mpsc::channel::<()>(target as usize + 1);
        let mut submitted = 0usize;
        let mut offset = 0u32;

        while offset < target {
            let limit = PAGE_SIZE.min(target - offset);
            let page = client.list_catalog(limit, offset, None).await?;
            if page.data.is_empty() {
                break;
            }

            for raw_entry in page.data {
                let pool = pool.clone();
                let done_tx = done_tx.clone();
                worker_pool
                    .submit(move |_cancel| async move {
                        if let Err(err) = persist_initial_entry(&pool, raw_entry) {
                            warn!("initial sync: failed to persist an entry: {err}");
                        }
                        let _ = done_tx.send(()).await;
                    })
                    .await;
                submitted += 1;
            }

            offset += limit;
        }

        drop(done_tx);
        for _ in 0..submitted {
            done_rx.recv().await;
        }

        info!("initial bulk import processed {submitted} entries");
        Ok(Utc::now().to_rfc3339())
    })
    .await
}

fn persist_initial_entry(pool: &ConnectionPool, raw_entry: RawCatalogEntry) -> Result<(), IngestError> {
    let canonical = match raw_entry.into_canonical() {
        Ok(canonical) => canonical,
        Err(err) => {
            warn!("initial sync: rejecting an entry at extraction: {err}");
            return Ok(());
        }
    };

    let external_id = match Uuid::parse_str(&canonical.external_id) {
        Ok(id) => id,
        Err(err) => {
            warn!(
                "initial sync: entry {} has an unparseable external id: {err}",
                canonical.external_id
            );
            return Ok(());
        }
    };

    let total_chapters = parse_chapter_number(canonical.last_chapter.as_deref());
    let slug = slugify(&canonical.title);

    let new_entry = NewCatalogEntry {
        external_id,
        slug: &slug,
        title: &canonical.title,
        author: None,
        status: canonical.status.as_deref(),
        description: canonical.description.as_deref(),
        cover: None,
        total_chapters,
        last_synced_at: Some(Utc::now()),
    };

    let mut conn = pool.get()?;
    db::db::catalog::insert_catalog_entry(&mut conn, &new_entry)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::db::catalog;
    use diesel::prelude::*;
    use diesel::sql_types::Int4;
    use provider::model::RawCatalogAttributes;
    use std::collections::BTreeMap;

    async fn test_pool() -> ConnectionPool {
        db::migrations::run_migrations().expect("failed to run migrations");
        db::get_pool(3).expect("failed to build a connection pool")
    }

    #[tokio::test]
    async fn persist_initial_entry_stores_the_canonical_fields() {
        let pool = test_pool().await;
        let external_id = Uuid::new_v4();

        let mut titles = BTreeMap::new();
        titles.insert("en".to_string(), "Initial Sync Test Manga".to_string());
        let entry = RawCatalogEntry {
            id: external_id.to_string(),
            attributes: RawCatalogAttributes {
                title: titles,
                description: BTreeMap::new(),
                status: Some("ongoing".to_string()),
                last_chapter: Some("42".to_string()),
                tags: vec![],
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            relationships: vec![],
        };

        persist_initial_entry(&pool, entry).expect("persisting the entry should succeed");

        let mut conn = pool.get().expect("failed to get a connection");
        let stored = catalog::find_by_external_id(&mut conn, external_id)
            .expect("failed to query the catalog")
            .expect("the entry should have been persisted");
        assert_eq!(stored.title, "Initial Sync Test Manga");
        assert_eq!(stored.status.as_deref(), Some("ongoing"));
        assert_eq!(stored.total_chapters, 42);

        let _ = diesel::sql_query("delete from catalog where id = $1")
            .bind::<Int4, _>(stored.id)
            .execute(&mut conn);
    }
}
