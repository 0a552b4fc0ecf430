use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::pool::WorkerPool;
use crate::sync_guard::run_guarded;
use chrono::Utc;
use db::db::catalog;
use db::models::{CatalogEntry, NewChapter};
use db::ConnectionPool;
use log::{info, warn};
use notify::{Event, EventGateway};
use provider::model::{parse_chapter_decimal, parse_chapter_number};
use provider::{FeedOrder, ProviderClient};
use uuid::Uuid;

const SYNC_TYPE: &str = "chapter_check";
const FEED_PAGE_SIZE: u32 = 100;

/// Selects entries due for a chapter-update check (stale or never
/// checked, oldest first), fetches each entry's feed in descending
/// chapter order, and persists every chapter whose number exceeds the
/// entry's current `total_chapters` watermark. Emits one `NEW_CHAPTER`
/// event per newly observed chapter and advances the watermark to the
/// highest chapter actually seen, even when no new chapter is found, so
/// the entry doesn't come up due again until the next cadence.
pub async fn run(
    pool: ConnectionPool,
    client: &ProviderClient,
    gateway: &EventGateway,
    worker_pool: &WorkerPool,
    cfg: &IngestConfig,
) -> Result<(), IngestError> {
    let cutoff = Utc::now() - chrono::Duration::hours(cfg.chapter_check_cadence_hours);
    let entries = {
        let mut conn = pool.get()?;
        catalog::due_for_chapter_check(&mut conn, cutoff, cfg.chapter_check_batch_size)?
    };

    run_guarded(&pool, SYNC_TYPE, move || async move {
        let total = entries.len();
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let checked_at = Utc::now();

        for entry in entries {
            let feed = match client.get_feed(&entry.external_id.to_string(), FEED_PAGE_SIZE, FeedOrder::Descending).await {
                Ok(feed) => feed,
                Err(err) => {
                    warn!("chapter-check: feed fetch failed for catalog entry {}: {err}", entry.id);
                    continue;
                }
            };

            let pool = pool.clone();
            let gateway = gateway.clone();
            let done_tx = done_tx.clone();
            let new_chapters: Vec<_> = feed
                .data
                .into_iter()
                .map(|raw| raw.into_canonical())
                .collect();

            worker_pool
                .submit(move |_cancel| async move {
                    if let Err(err) = persist_new_chapters(&pool, &gateway, &entry, new_chapters, checked_at).await {
                        warn!("chapter-check: failed to process entry {}: {err}", entry.id);
                    }
                    let _ = done_tx.send(());
                })
                .await;
        }

        drop(done_tx);
        for _ in 0..total {
            done_rx.recv().await;
        }

        info!("chapter-check poll examined {total} entries");
        Ok(checked_at.to_rfc3339())
    })
    .await
}

async fn persist_new_chapters(
    pool: &ConnectionPool,
    gateway: &EventGateway,
    entry: &CatalogEntry,
    candidates: Vec<provider::model::CanonicalChapter>,
    checked_at: chrono::DateTime<Utc>,
) -> Result<(), IngestError> {
    let mut highest_observed = entry.total_chapters;

    for candidate in candidates {
        let chapter_number = parse_chapter_number(candidate.chapter.as_deref());
        if chapter_number <= entry.total_chapters {
            continue;
        }

        let Some(chapter_decimal) = parse_chapter_decimal(candidate.chapter.as_deref()) else {
            warn!(
                "chapter-check: chapter {} of entry {} has an unparseable chapter number",
                candidate.external_id, entry.id
            );
            continue;
        };

        highest_observed = highest_observed.max(chapter_number);

        let external_id = match Uuid::parse_str(&candidate.external_id) {
            Ok(id) => id,
            Err(err) => {
                warn!(
                    "chapter-check: chapter {} of entry {} has an unparseable external id: {err}",
                    candidate.external_id, entry.id
                );
                continue;
            }
        };

        let new_chapter = NewChapter {
            catalog_id: entry.id,
            external_id,
            chapter_number: chapter_decimal,
            title: candidate.title.as_deref(),
            volume: candidate.volume.as_deref(),
            pages: candidate.pages,
            published_at: candidate.published_at,
        };

        let inserted = {
            let mut conn = pool.get()?;
            db::db::chapters::insert_chapter(&mut conn, &new_chapter)?
        };

        let Some(_chapter) = inserted else {
            // Lost a concurrent insert race; the winner already emitted the event.
            continue;
        };

        if let Err(err) = gateway
            .emit(Event::NewChapter {
                catalog_id: entry.id,
                title: entry.title.clone(),
                chapter_number: chapter_decimal.to_string(),
                previous_chapter: Some(entry.total_chapters.to_string()),
            })
            .await
        {
            warn!("chapter-check: failed to emit NEW_CHAPTER for entry {}: {err}", entry.id);
        }
    }

    let mut conn = pool.get()?;
    catalog::advance_chapter_watermark(&mut conn, entry.id, highest_observed, checked_at)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::NewCatalogEntry;
    use diesel::prelude::*;
    use diesel::sql_types::Int4;
    use notify::SubscriberRegistry;
    use provider::model::CanonicalChapter;
    use rust_decimal::Decimal;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    async fn test_pool() -> ConnectionPool {
        db::migrations::run_migrations().expect("failed to run migrations");
        db::get_pool(3).expect("failed to build a connection pool")
    }

    async fn test_gateway(pool: ConnectionPool) -> EventGateway {
        let registry = Arc::new(SubscriberRegistry::new(Duration::from_secs(300)));
        let socket = Arc::new(
            UdpSocket::bind("127.0.0.1:0")
                .await
                .expect("failed to bind a socket"),
        );
        EventGateway::new(pool, registry, socket)
    }

    fn candidate(chapter: &str) -> CanonicalChapter {
        CanonicalChapter {
            external_id: Uuid::new_v4().to_string(),
            chapter: Some(chapter.to_string()),
            title: None,
            volume: None,
            pages: None,
            published_at: None,
        }
    }

    /// Regression test for the fractional-chapter persistence bug: a
    /// candidate like "7.5" must be stored with its exact decimal value,
    /// not floored to "7", and a chapter below the watermark must be
    /// skipped entirely.
    #[tokio::test]
    async fn persist_new_chapters_keeps_fractional_precision_and_skips_stale_candidates() {
        let pool = test_pool().await;
        let gateway = test_gateway(pool.clone()).await;
        let mut conn = pool.get().expect("failed to get a connection");

        let new_entry = NewCatalogEntry {
            external_id: Uuid::new_v4(),
            slug: "chapter-check-test-manga",
            title: "Chapter Check Test Manga",
            author: None,
            status: None,
            description: None,
            cover: None,
            total_chapters: 5,
            last_synced_at: None,
        };
        let entry = catalog::insert_catalog_entry(&mut conn, &new_entry)
            .expect("failed to insert the test catalog entry")
            .expect("slug/external_id should not collide");

        let candidates = vec![candidate("7.5"), candidate("4")];

        persist_new_chapters(&pool, &gateway, &entry, candidates, Utc::now())
            .await
            .expect("persisting new chapters should succeed");

        let advanced = catalog::get(&mut conn, entry.id).expect("failed to reload the catalog entry");
        assert_eq!(advanced.total_chapters, 7, "watermark should advance to the floor of 7.5");

        let duplicate_of_persisted = db::db::chapters::insert_chapter(
            &mut conn,
            &db::models::NewChapter {
                catalog_id: entry.id,
                external_id: Uuid::new_v4(),
                chapter_number: Decimal::new(75, 1),
                title: None,
                volume: None,
                pages: None,
                published_at: None,
            },
        )
        .expect("insert_chapter should not error");
        assert!(
            duplicate_of_persisted.is_none(),
            "chapter 7.5 should already exist with its exact decimal value, not floored to 7"
        );

        let stale_candidate_chapter = db::db::chapters::insert_chapter(
            &mut conn,
            &db::models::NewChapter {
                catalog_id: entry.id,
                external_id: Uuid::new_v4(),
                chapter_number: Decimal::from(4),
                title: None,
                volume: None,
                pages: None,
                published_at: None,
            },
        )
        .expect("insert_chapter should not error");
        assert!(
            stale_candidate_chapter.is_some(),
            "chapter 4 is below the watermark and should never have been persisted"
        );

        let _ = diesel::sql_query("delete from chapters where catalog_id = $1")
            .bind::<Int4, _>(entry.id)
            .execute(&mut conn);
        let _ = diesel::sql_query("delete from catalog where id = $1")
            .bind::<Int4, _>(entry.id)
            .execute(&mut conn);
    }
}
