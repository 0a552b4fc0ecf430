use crate::models::{NewUserProgress, UserProgress};
use crate::schema::user_progress::dsl;
use diesel::prelude::*;
use diesel::sql_types::{Int4, Nullable, Text, Timestamptz};

/// Upserts a progress record with last-writer-wins on `updated_at`: if a
/// row already exists for this key with a newer `updated_at`, the new
/// record is ignored rather than overwriting it. Grounded on
/// `catalog::advance_chapter_watermark`'s use of a raw conditional SQL
/// statement for the same "only advance, never regress" shape.
pub fn upsert(conn: &mut PgConnection, record: &NewUserProgress) -> QueryResult<usize> {
    diesel::sql_query(
        "insert into user_progress (user_id, catalog_id, current_chapter, status, page, updated_at) \
         values ($1, $2, $3, $4, $5, $6) \
         on conflict (user_id, catalog_id) do update set \
         current_chapter = excluded.current_chapter, \
         status = excluded.status, \
         page = excluded.page, \
         updated_at = excluded.updated_at \
         where user_progress.updated_at <= excluded.updated_at",
    )
    .bind::<Int4, _>(record.user_id)
    .bind::<Int4, _>(record.catalog_id)
    .bind::<Int4, _>(record.current_chapter)
    .bind::<Text, _>(&record.status)
    .bind::<Nullable<Int4>, _>(record.page)
    .bind::<Timestamptz, _>(record.updated_at)
    .execute(conn)
}

pub fn get(conn: &mut PgConnection, user_id: i32, catalog_id: i32) -> QueryResult<Option<UserProgress>> {
    dsl::user_progress
        .find((user_id, catalog_id))
        .first(conn)
        .optional()
}
