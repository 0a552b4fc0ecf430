use crate::models::{CatalogEntry, NewCatalogEntry};
use crate::schema::catalog::dsl;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{Int4, Timestamptz};

/// Inserts a new catalog entry. A unique-constraint violation on
/// `external_id` or `slug` is a benign lost race:
/// another concurrent poller already won, so this returns `Ok(None)`
/// instead of an error.
pub fn insert_catalog_entry(
    conn: &mut PgConnection,
    new_entry: &NewCatalogEntry,
) -> QueryResult<Option<CatalogEntry>> {
    match diesel::insert_into(dsl::catalog)
        .values(new_entry)
        .get_result(conn)
    {
        Ok(entry) => Ok(Some(entry)),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Ok(None),
        Err(err) => Err(err),
    }
}

pub fn find_by_external_id(
    conn: &mut PgConnection,
    external_id: uuid::Uuid,
) -> QueryResult<Option<CatalogEntry>> {
    dsl::catalog
        .filter(dsl::external_id.eq(external_id))
        .first(conn)
        .optional()
}

pub fn get(conn: &mut PgConnection, id: i32) -> QueryResult<CatalogEntry> {
    dsl::catalog.find(id).first(conn)
}

/// Applies the chapter-check watermark update: the new
/// `total_chapters` is the max of the old value and the highest observed
/// chapter, and `last_chapter_check` always advances to `checked_at`.
pub fn advance_chapter_watermark(
    conn: &mut PgConnection,
    id: i32,
    highest_observed: i32,
    checked_at: DateTime<Utc>,
) -> QueryResult<usize> {
    diesel::sql_query(
        "update catalog set total_chapters = greatest(total_chapters, $1), \
         last_chapter_check = $2 where id = $3",
    )
    .bind::<Int4, _>(highest_observed)
    .bind::<Timestamptz, _>(checked_at)
    .bind::<Int4, _>(id)
    .execute(conn)
}

pub fn mark_synced(conn: &mut PgConnection, id: i32, at: DateTime<Utc>) -> QueryResult<usize> {
    diesel::update(dsl::catalog.find(id))
        .set(dsl::last_synced_at.eq(at))
        .execute(conn)
}

/// Selects up to `limit` entries due for a chapter-update poll:
/// `last_chapter_check IS NULL OR last_chapter_check < cutoff`, oldest
/// first.
pub fn due_for_chapter_check(
    conn: &mut PgConnection,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> QueryResult<Vec<CatalogEntry>> {
    dsl::catalog
        .filter(
            dsl::last_chapter_check
                .is_null()
                .or(dsl::last_chapter_check.lt(cutoff)),
        )
        .order_by(dsl::last_chapter_check.asc().nulls_first())
        .limit(limit)
        .load(conn)
}
