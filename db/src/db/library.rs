use diesel::prelude::*;

/// Recipient resolution for `NEW_MANGA` events: every known user.
/// Owned by the out-of-scope CRUD layer's `users` table; the core only reads it.
pub fn all_user_ids(conn: &mut PgConnection) -> QueryResult<Vec<i32>> {
    use crate::schema::users::dsl;

    dsl::users.select(dsl::id).load(conn)
}

/// Recipient resolution for `NEW_CHAPTER`/`MANGA_UPDATE` events: users whose
/// library contains `catalog_id`.
pub fn users_for(conn: &mut PgConnection, catalog_id: i32) -> QueryResult<Vec<i32>> {
    use crate::schema::user_library::dsl;

    dsl::user_library
        .filter(dsl::catalog_id.eq(catalog_id))
        .select(dsl::user_id)
        .load(conn)
}
