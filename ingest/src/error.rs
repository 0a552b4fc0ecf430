use db::PoolError;
use miette::Diagnostic;
use provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("error acquiring a database connection")]
    Pool(#[from] PoolError),

    #[error("database query failed")]
    Db(#[from] diesel::result::Error),

    #[error("catalog provider request failed")]
    Provider(#[from] ProviderError),

    #[error("error joining a worker task")]
    Join(#[from] tokio::task::JoinError),
}
