use crate::models::{SyncState, SyncStatus};
use crate::schema::sync_state::dsl;
use chrono::{DateTime, Utc};
use diesel::prelude::*;

/// Starts a run for `sync_type` unless one is already `running`, per the
/// `idle -> running -> {completed|error}` state machine. Returns the
/// acquired row on success, or `None` if another runner already holds it.
pub fn try_start(conn: &mut PgConnection, sync_type: &str, at: DateTime<Utc>) -> QueryResult<Option<SyncState>> {
    conn.transaction(|conn| {
        let existing: Option<SyncState> = dsl::sync_state
            .find(sync_type)
            .for_update()
            .first(conn)
            .optional()?;

        match existing {
            Some(row) if row.status == SyncStatus::Running.to_string() => Ok(None),
            Some(_) => {
                let row = diesel::update(dsl::sync_state.find(sync_type))
                    .set((dsl::status.eq(SyncStatus::Running.to_string()), dsl::last_run_at.eq(at)))
                    .get_result(conn)?;
                Ok(Some(row))
            }
            None => {
                let row = diesel::insert_into(dsl::sync_state)
                    .values((
                        dsl::sync_type.eq(sync_type),
                        dsl::status.eq(SyncStatus::Running.to_string()),
                        dsl::last_run_at.eq(at),
                    ))
                    .get_result(conn)?;
                Ok(Some(row))
            }
        }
    })
}

pub fn get(conn: &mut PgConnection, sync_type: &str) -> QueryResult<Option<SyncState>> {
    dsl::sync_state.find(sync_type).first(conn).optional()
}

pub fn mark_completed(
    conn: &mut PgConnection,
    sync_type: &str,
    cursor: &str,
    at: DateTime<Utc>,
) -> QueryResult<usize> {
    diesel::update(dsl::sync_state.find(sync_type))
        .set((
            dsl::status.eq(SyncStatus::Completed.to_string()),
            dsl::last_cursor.eq(cursor),
            dsl::last_success_at.eq(at),
            dsl::error_message.eq(None::<String>),
        ))
        .execute(conn)
}

pub fn mark_error(
    conn: &mut PgConnection,
    sync_type: &str,
    message: &str,
) -> QueryResult<usize> {
    diesel::update(dsl::sync_state.find(sync_type))
        .set((dsl::status.eq(SyncStatus::Error.to_string()), dsl::error_message.eq(message)))
        .execute(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_status_strings_match_the_state_machine_vocabulary() {
        assert_eq!(SyncStatus::Idle.to_string(), "idle");
        assert_eq!(SyncStatus::Running.to_string(), "running");
        assert_eq!(SyncStatus::Completed.to_string(), "completed");
        assert_eq!(SyncStatus::Error.to_string(), "error");
    }
}
