use diesel::sql_types::BigInt;
use diesel::{Connection, ConnectionError, PgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::info;
use miette::Diagnostic;
use std::error::Error;
use thiserror::Error;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
const MIGRATION_LOCK_ID: i64 = 7741;

#[derive(Debug, Error, Diagnostic)]
pub enum MigrationError {
    #[error("couldn't connect to database")]
    Connect(#[source] ConnectionError),

    #[error("error acquiring migrations lock")]
    AcquireLock(#[source] diesel::result::Error),

    #[error("error running migrations")]
    Run(#[source] Box<dyn Error + Send + Sync>),
}

/// Runs embedded migrations under a Postgres advisory lock, so that
/// multiple app replicas starting up concurrently don't race to create
/// the same tables.
pub fn run_migrations() -> Result<(), MigrationError> {
    let url = crate::postgres_url_from_environment();
    let mut conn = PgConnection::establish(&url).map_err(MigrationError::Connect)?;

    info!("acquiring migrations lock");
    diesel::sql_query("select pg_advisory_lock($1)")
        .bind::<BigInt, _>(MIGRATION_LOCK_ID)
        .execute(&mut conn)
        .map_err(MigrationError::AcquireLock)?;

    let result = conn.run_pending_migrations(MIGRATIONS).map(|_| ()).map_err(MigrationError::Run);

    diesel::sql_query("select pg_advisory_unlock($1)")
        .bind::<BigInt, _>(MIGRATION_LOCK_ID)
        .execute(&mut conn)
        .map_err(MigrationError::AcquireLock)?;

    result
}
