use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::pool::WorkerPool;
use crate::sync_guard::run_guarded;
use crate::util::slugify;
use chrono::{DateTime, Utc};
use db::db::sync_state;
use db::models::NewCatalogEntry;
use db::ConnectionPool;
use log::{info, warn};
use notify::{Event, EventGateway};
use provider::model::{parse_chapter_number, RawCatalogEntry};
use provider::ProviderClient;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const SYNC_TYPE: &str = "new_manga_poll";
const PAGE_SIZE: u32 = 100;
/// Caps how many pages a single tick will drain, so a large backlog
/// can't make one poll run indefinitely; the next tick picks up from
/// wherever this one's cursor landed.
const MAX_PAGES: u32 = 50;

/// Fetches entries created since the last success cursor (or now - 24h
/// on first run), ordered ascending by creation time. New entries are
/// persisted and emit a `NEW_MANGA` event; entries that already exist
/// (by external id) are skipped. A concurrent unique-constraint loss on
/// insert is a benign race: the winning task already emitted the event.
pub async fn run(
    pool: ConnectionPool,
    client: &ProviderClient,
    gateway: &EventGateway,
    worker_pool: &WorkerPool,
    cfg: &IngestConfig,
) -> Result<(), IngestError> {
    let cursor = {
        let mut conn = pool.get()?;
        match sync_state::get(&mut conn, SYNC_TYPE)? {
            Some(row) if row.last_cursor.is_some() => row.last_cursor.unwrap(),
            _ => (Utc::now() - chrono::Duration::hours(cfg.new_manga_poll_cadence_hours)).to_rfc3339(),
        }
    };

    let since: DateTime<Utc> = DateTime::parse_from_rfc3339(&cursor)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now() - chrono::Duration::hours(cfg.new_manga_poll_cadence_hours));

    run_guarded(&pool, SYNC_TYPE, move || async move {
        let max_seen = Arc::new(Mutex::new(since));
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let mut submitted = 0usize;
        let mut offset = 0u32;
        let mut page_index = 0u32;

        loop {
            let page = client.list_catalog(PAGE_SIZE, offset, Some(since)).await?;
            if page.data.is_empty() {
                break;
            }

            for raw_entry in page.data {
                let pool = pool.clone();
                let max_seen = max_seen.clone();
                let done_tx = done_tx.clone();
                let gateway = gateway.clone();
                worker_pool
                    .submit(move |_cancel| async move {
                        if let Err(err) = process_new_entry(&pool, &gateway, raw_entry, &max_seen).await {
                            warn!("new-manga poll: failed to process an entry: {err}");
                        }
                        let _ = done_tx.send(());
                    })
                    .await;
                submitted += 1;
            }

            offset += PAGE_SIZE;
            page_index += 1;
            if page_index >= MAX_PAGES || (offset as i64) >= page.total {
                break;
            }
        }

        drop(done_tx);
        for _ in 0..submitted {
            done_rx.recv().await;
        }

        let cursor = *max_seen.lock().expect("max_seen lock poisoned");
        info!("new-manga poll processed {submitted} entries, cursor now {cursor}");
        Ok(cursor.to_rfc3339())
    })
    .await
}

async fn process_new_entry(
    pool: &ConnectionPool,
    gateway: &EventGateway,
    raw_entry: RawCatalogEntry,
    max_seen: &Arc<Mutex<DateTime<Utc>>>,
) -> Result<(), IngestError> {
    let canonical = match raw_entry.into_canonical() {
        Ok(canonical) => canonical,
        Err(err) => {
            warn!("new-manga poll: rejecting an entry at extraction: {err}");
            return Ok(());
        }
    };

    advance_max_seen(max_seen, canonical.created_at);

    let external_id = match Uuid::parse_str(&canonical.external_id) {
        Ok(id) => id,
        Err(err) => {
            warn!(
                "new-manga poll: entry {} has an unparseable external id: {err}",
                canonical.external_id
            );
            return Ok(());
        }
    };

    {
        let mut conn = pool.get()?;
        if db::db::catalog::find_by_external_id(&mut conn, external_id)?.is_some() {
            return Ok(());
        }
    }

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

    let inserted = {
        let mut conn = pool.get()?;
        db::db::catalog::insert_catalog_entry(&mut conn, &new_entry)?
    };

    let Some(entry) = inserted else {
        // Lost a concurrent insert race; the winner already emitted the event.
        return Ok(());
    };

    let entry_id = entry.id;
    if let Err(err) = gateway
        .emit(Event::NewManga {
            catalog_id: entry.id,
            title: entry.title,
        })
        .await
    {
        warn!("new-manga poll: failed to emit NEW_MANGA for entry {entry_id}: {err}");
    }

    Ok(())
}

fn advance_max_seen(max_seen: &Arc<Mutex<DateTime<Utc>>>, candidate: DateTime<Utc>) {
    let mut max_seen = max_seen.lock().expect("max_seen lock poisoned");
    if candidate > *max_seen {
        *max_seen = candidate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::db::catalog;
    use diesel::prelude::*;
    use diesel::sql_types::Int4;
    use notify::SubscriberRegistry;
    use provider::model::RawCatalogAttributes;
    use std::collections::BTreeMap;
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

    fn raw_entry(external_id: &str, title: &str, created_at: DateTime<Utc>) -> RawCatalogEntry {
        let mut titles = BTreeMap::new();
        titles.insert("en".to_string(), title.to_string());
        RawCatalogEntry {
            id: external_id.to_string(),
            attributes: RawCatalogAttributes {
                title: titles,
                description: BTreeMap::new(),
                status: None,
                last_chapter: None,
                tags: vec![],
                created_at,
                updated_at: created_at,
            },
            relationships: vec![],
        }
    }

    /// Covers both halves of the entry's lifecycle: a first sighting
    /// inserts the entry and advances the cursor, and a repeat sighting of
    /// the same external id (the `find_by_external_id` guard) is a no-op.
    #[tokio::test]
    async fn process_new_entry_inserts_once_and_advances_the_cursor() {
        let pool = test_pool().await;
        let gateway = test_gateway(pool.clone()).await;

        let external_id = Uuid::new_v4();
        let created_at = Utc::now();
        let entry = raw_entry(&external_id.to_string(), "New Manga Poll Test", created_at);
        let max_seen = Arc::new(Mutex::new(created_at - chrono::Duration::days(1)));

        process_new_entry(&pool, &gateway, entry.clone(), &max_seen)
            .await
            .expect("processing the entry should succeed");

        let mut conn = pool.get().expect("failed to get a connection");
        let stored = catalog::find_by_external_id(&mut conn, external_id)
            .expect("failed to query the catalog")
            .expect("the entry should have been persisted");
        assert_eq!(*max_seen.lock().unwrap(), created_at);

        process_new_entry(&pool, &gateway, entry, &max_seen)
            .await
            .expect("reprocessing an existing entry should still succeed");

        let still_one = catalog::find_by_external_id(&mut conn, external_id)
            .expect("failed to query the catalog")
            .expect("the entry should still be present");
        assert_eq!(still_one.id, stored.id);

        let _ = diesel::sql_query("delete from catalog where id = $1")
            .bind::<Int4, _>(stored.id)
            .execute(&mut conn);
    }
}
