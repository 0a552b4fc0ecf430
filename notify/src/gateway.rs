use crate::error::NotifyError;
use crate::event::Event;
use crate::registry::SubscriberRegistry;
use chrono::Utc;
use db::models::NewNotification;
use db::ConnectionPool;
use hashbrown::HashMap;
use log::warn;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Accepts inbound change events (from the ingestion orchestrator or the
/// out-of-scope CRUD layer) and fans them out. Depends only on the
/// library's read-only `users_for`/`all_user_ids` lookups, never the
/// other way around, so CRUD handlers can depend on `emit` without this
/// module depending back on them.
#[derive(Clone)]
pub struct EventGateway {
    pool: ConnectionPool,
    registry: Arc<SubscriberRegistry>,
    socket: Arc<UdpSocket>,
}

impl EventGateway {
    pub fn new(pool: ConnectionPool, registry: Arc<SubscriberRegistry>, socket: Arc<UdpSocket>) -> Self {
        Self { pool, registry, socket }
    }

    /// Resolves recipients, persists one unread Stored Notification per
    /// recipient, marshals the envelope once, and attempts a single
    /// datagram send per currently-connected recipient in parallel. Each
    /// successful send marks its Stored Notification read
    /// (acknowledgement-by-delivery); failed or offline recipients keep
    /// their notification unread for reconnect-sync to pick up later.
    pub async fn emit(&self, event: Event) -> Result<(), NotifyError> {
        let recipients = self.resolve_recipients(&event)?;
        if recipients.is_empty() {
            return Ok(());
        }

        let notification_ids = self.persist_notifications(&event, &recipients);

        let envelope = event.to_envelope();
        let payload = serde_json::to_vec(&envelope)?;

        let live = self.registry.lookup_many(&recipients);
        if live.is_empty() {
            return Ok(());
        }

        let sends = live.into_iter().map(|(user_id, addr)| {
            let socket = self.socket.clone();
            let payload = payload.clone();
            async move {
                let sent = socket.send_to(&payload, addr).await;
                (user_id, sent.is_ok())
            }
        });

        let results = futures::future::join_all(sends).await;

        let mut conn = self.pool.get()?;
        for (user_id, sent) in results {
            if !sent {
                continue;
            }
            if let Some(&notification_id) = notification_ids.get(&user_id)
                && let Err(err) = db::db::notifications::mark_read(&mut conn, notification_id)
            {
                warn!("failed to mark notification {notification_id} read after delivery: {err}");
            }
        }

        Ok(())
    }

    fn resolve_recipients(&self, event: &Event) -> Result<Vec<i32>, NotifyError> {
        let mut conn = self.pool.get()?;
        let recipients = match event {
            Event::NewManga { .. } => db::db::library::all_user_ids(&mut conn)?,
            Event::NewChapter { catalog_id, .. } | Event::MangaUpdate { catalog_id, .. } => {
                db::db::library::users_for(&mut conn, *catalog_id)?
            }
        };
        Ok(recipients)
    }

    /// Best-effort: a failure to persist one recipient's notification is
    /// logged and skipped rather than aborting the whole fan-out, since
    /// every recipient is an independent row.
    fn persist_notifications(&self, event: &Event, recipients: &[i32]) -> HashMap<i32, i64> {
        let mut ids = HashMap::new();
        let mut conn = match self.pool.get() {
            Ok(conn) => conn,
            Err(err) => {
                warn!("could not acquire a connection to persist notifications: {err}");
                return ids;
            }
        };

        let notification_type = event.type_name();
        let catalog_id = event.catalog_id();
        let title = event.title().to_string();
        let message = event.message();
        let created_at = Utc::now();

        for &user_id in recipients {
            let new_notification = NewNotification {
                user_id,
                notification_type,
                catalog_id,
                title: &title,
                message: &message,
                read: false,
                created_at,
            };
            match db::db::notifications::insert(&mut conn, &new_notification) {
                Ok(stored) => {
                    ids.insert(user_id, stored.id);
                }
                Err(err) => warn!("failed to persist notification for user {user_id}: {err}"),
            }
        }

        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::db::{catalog, notifications};
    use db::models::NewCatalogEntry;
    use diesel::sql_types::Int4;
    use std::time::Duration;
    use uuid::Uuid;

    async fn test_pool() -> ConnectionPool {
        db::migrations::run_migrations().expect("failed to run migrations");
        db::get_pool(3).expect("failed to build a connection pool")
    }

    fn insert_test_user(conn: &mut db::PgConnection, user_id: i32) {
        diesel::sql_query("insert into users (id) values ($1)")
            .bind::<Int4, _>(user_id)
            .execute(conn)
            .expect("failed to insert a test user");
    }

    fn insert_test_library_entry(conn: &mut db::PgConnection, user_id: i32, catalog_id: i32) {
        diesel::sql_query("insert into user_library (user_id, catalog_id) values ($1, $2)")
            .bind::<Int4, _>(user_id)
            .bind::<Int4, _>(catalog_id)
            .execute(conn)
            .expect("failed to insert a test library entry");
    }

    fn cleanup(conn: &mut db::PgConnection, user_id: i32, catalog_id: i32) {
        let _ = diesel::sql_query("delete from notifications where catalog_id = $1")
            .bind::<Int4, _>(catalog_id)
            .execute(conn);
        let _ = diesel::sql_query("delete from user_library where user_id = $1")
            .bind::<Int4, _>(user_id)
            .execute(conn);
        let _ = diesel::sql_query("delete from catalog where id = $1")
            .bind::<Int4, _>(catalog_id)
            .execute(conn);
        let _ = diesel::sql_query("delete from users where id = $1")
            .bind::<Int4, _>(user_id)
            .execute(conn);
    }

    /// Covers the resolve -> persist -> marshal-once -> fan-out -> mark-read
    /// path end to end: a subscriber listening on a real UDP socket should
    /// receive the envelope, and its Stored Notification should flip to
    /// read once the send succeeds.
    #[tokio::test]
    async fn emit_persists_then_marks_read_once_delivery_succeeds() {
        let pool = test_pool().await;
        let mut conn = pool.get().expect("failed to get a connection");

        let new_entry = NewCatalogEntry {
            external_id: Uuid::new_v4(),
            slug: "gateway-test-manga",
            title: "Gateway Test Manga",
            author: None,
            status: None,
            description: None,
            cover: None,
            total_chapters: 0,
            last_synced_at: None,
        };
        let catalog_entry = catalog::insert_catalog_entry(&mut conn, &new_entry)
            .expect("failed to insert the test catalog entry")
            .expect("slug/external_id should not collide");
        let catalog_id = catalog_entry.id;

        let user_id = 900_001;
        insert_test_user(&mut conn, user_id);
        insert_test_library_entry(&mut conn, user_id, catalog_id);

        let subscriber_socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("failed to bind a subscriber socket");
        let subscriber_addr = subscriber_socket.local_addr().unwrap();

        let registry = Arc::new(SubscriberRegistry::new(Duration::from_secs(300)));
        registry.add(user_id, subscriber_addr);

        let sender_socket = Arc::new(
            UdpSocket::bind("127.0.0.1:0")
                .await
                .expect("failed to bind the gateway socket"),
        );
        let gateway = EventGateway::new(pool.clone(), registry, sender_socket);

        gateway
            .emit(Event::NewChapter {
                catalog_id,
                title: "Gateway Test Manga".to_string(),
                chapter_number: "5".to_string(),
                previous_chapter: None,
            })
            .await
            .expect("emit should succeed");

        let mut buf = [0u8; 2048];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), subscriber_socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for the datagram")
            .expect("failed to receive the datagram");
        let envelope: serde_json::Value = serde_json::from_slice(&buf[..len]).expect("datagram was not valid JSON");
        assert_eq!(envelope["type"], "NEW_CHAPTER");
        assert_eq!(envelope["manga_id"], catalog_id);

        let unread = notifications::unread_for_user(&mut conn, user_id).expect("failed to query notifications");
        assert!(unread.is_empty(), "the delivered notification should have been marked read");

        cleanup(&mut conn, user_id, catalog_id);
    }
}
