use crate::models::{Chapter, NewChapter};
use crate::schema::chapters::dsl;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};

/// Inserts a chapter. A unique-constraint violation on `external_id` or
/// `(catalog_id, chapter_number)` is a benign lost race: another task
/// already upserted this chapter, so this returns `Ok(None)`.
pub fn insert_chapter(
    conn: &mut PgConnection,
    new_chapter: &NewChapter,
) -> QueryResult<Option<Chapter>> {
    match diesel::insert_into(dsl::chapters)
        .values(new_chapter)
        .get_result(conn)
    {
        Ok(chapter) => Ok(Some(chapter)),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Ok(None),
        Err(err) => Err(err),
    }
}
