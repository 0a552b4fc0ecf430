use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::catalog)]
pub struct NewCatalogEntry<'a> {
    pub external_id: Uuid,
    pub slug: &'a str,
    pub title: &'a str,
    pub author: Option<&'a str>,
    pub status: Option<&'a str>,
    pub description: Option<&'a str>,
    pub cover: Option<&'a str>,
    pub total_chapters: i32,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::catalog)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CatalogEntry {
    pub id: i32,
    pub external_id: Uuid,
    pub slug: String,
    pub title: String,
    pub author: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub total_chapters: i32,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_chapter_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::chapters)]
pub struct NewChapter<'a> {
    pub catalog_id: i32,
    pub external_id: Uuid,
    pub chapter_number: Decimal,
    pub title: Option<&'a str>,
    pub volume: Option<&'a str>,
    pub pages: Option<i32>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::chapters)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Chapter {
    pub id: i64,
    pub catalog_id: i32,
    pub external_id: Uuid,
    pub chapter_number: Decimal,
    pub title: Option<String>,
    pub volume: Option<String>,
    pub pages: Option<i32>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SyncType {
    Initial,
    NewMangaPoll,
    ChapterCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::sync_state)]
#[diesel(primary_key(sync_type))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SyncState {
    pub sync_type: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_cursor: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    NewManga,
    NewChapter,
    MangaUpdate,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::notifications)]
pub struct NewNotification<'a> {
    pub user_id: i32,
    pub notification_type: &'a str,
    pub catalog_id: i32,
    pub title: &'a str,
    pub message: &'a str,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StoredNotification {
    pub id: i64,
    pub user_id: i32,
    pub notification_type: String,
    pub catalog_id: i32,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ProgressStatus {
    Reading,
    Completed,
    PlanToRead,
    Dropped,
    OnHold,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::user_progress)]
pub struct NewUserProgress {
    pub user_id: i32,
    pub catalog_id: i32,
    pub current_chapter: i32,
    pub status: String,
    pub page: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::user_progress)]
#[diesel(primary_key(user_id, catalog_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserProgress {
    pub user_id: i32,
    pub catalog_id: i32,
    pub current_chapter: i32,
    pub status: String,
    pub page: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn notification_type_round_trips_through_its_wire_string() {
        for variant in [NotificationType::NewManga, NotificationType::NewChapter, NotificationType::MangaUpdate] {
            let parsed = NotificationType::from_str(variant.as_ref()).unwrap();
            assert_eq!(parsed, variant);
        }
        assert_eq!(NotificationType::NewManga.as_ref(), "NEW_MANGA");
    }

    #[test]
    fn progress_status_uses_snake_case_wire_strings() {
        assert_eq!(ProgressStatus::PlanToRead.as_ref(), "plan_to_read");
        assert_eq!(ProgressStatus::OnHold.as_ref(), "on_hold");
    }

    #[test]
    fn sync_type_uses_snake_case_wire_strings() {
        assert_eq!(SyncType::NewMangaPoll.as_ref(), "new_manga_poll");
        assert_eq!(SyncType::ChapterCheck.as_ref(), "chapter_check");
    }
}
