use db::PoolError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum NotifyError {
    #[error("error acquiring a database connection")]
    Pool(#[from] PoolError),

    #[error("database query failed")]
    Db(#[from] diesel::result::Error),

    #[error("error marshalling an event envelope")]
    Marshal(#[from] serde_json::Error),

    #[error("error sending a subscriber datagram")]
    Send(#[source] std::io::Error),
}
