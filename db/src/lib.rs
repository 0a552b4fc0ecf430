mod url;
mod schema;
mod pool;
pub mod db;
pub mod models;

pub mod migrations;

pub use diesel::{Connection, PgConnection};
pub use pool::{ConnectionPool, PoolError, get_pool};
pub use url::postgres_url_from_environment;
