mod bucket;
mod client;
pub mod model;

pub use bucket::TokenBucket;
pub use client::{FeedOrder, ProviderClient, ProviderError};
