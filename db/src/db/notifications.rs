use crate::models::{NewNotification, StoredNotification};
use crate::schema::notifications::dsl;
use diesel::prelude::*;

pub fn insert(conn: &mut PgConnection, new_notification: &NewNotification) -> QueryResult<StoredNotification> {
    diesel::insert_into(dsl::notifications)
        .values(new_notification)
        .get_result(conn)
}

/// Marks a notification read. Acknowledgement-by-delivery: called once a
/// live datagram send to its recipient succeeds.
pub fn mark_read(conn: &mut PgConnection, id: i64) -> QueryResult<usize> {
    diesel::update(dsl::notifications.find(id))
        .set(dsl::read.eq(true))
        .execute(conn)
}

pub fn unread_for_user(conn: &mut PgConnection, user_id: i32) -> QueryResult<Vec<StoredNotification>> {
    dsl::notifications
        .filter(dsl::user_id.eq(user_id))
        .filter(dsl::read.eq(false))
        .order_by(dsl::created_at.asc())
        .load(conn)
}
