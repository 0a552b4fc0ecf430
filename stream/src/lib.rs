mod auth;
mod cache;
pub mod config;
mod connections;
mod error;
mod message;
mod server;
mod store;

pub use auth::{AuthedIdentity, Authenticator, HttpAuthenticator};
pub use cache::{CacheRepository, ProgressRecord};
pub use config::StreamConfig;
pub use error::StreamError;
pub use auth::test_support;
pub use server::StreamServer;
pub use store::{run_batch_drainer, HybridProgressStore};
