use db::PoolError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum StreamError {
    #[error("error acquiring a database connection")]
    Pool(#[from] PoolError),

    #[error("database query failed")]
    Db(#[from] diesel::result::Error),

    #[error("cache backend error")]
    Cache(#[from] redis::RedisError),

    #[error("error acquiring a cache connection")]
    CachePool(#[from] deadpool_redis::PoolError),

    #[error("error building the cache connection pool: {0}")]
    CacheInit(String),

    #[error("error marshalling a cache record")]
    Marshal(#[from] serde_json::Error),

    #[error("the progress store is closed")]
    Closed,
}
