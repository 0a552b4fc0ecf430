use crate::bucket::TokenBucket;
use crate::model::{RawCatalogPage, RawFeedPage};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use miette::Diagnostic;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOrder {
    Ascending,
    Descending,
}

impl FeedOrder {
    fn as_query_value(self) -> &'static str {
        match self {
            FeedOrder::Ascending => "asc",
            FeedOrder::Descending => "desc",
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    #[error("error building provider request")]
    RequestBuild(#[source] reqwest::Error),

    #[error("provider request failed after retries")]
    RequestExecute(#[source] reqwest::Error),

    #[error("provider rejected the request (client error)")]
    ClientError(#[source] reqwest::Error),

    #[error("error reading provider response body")]
    ResponseBody(#[source] reqwest::Error),

    #[error("error deserializing provider response")]
    Deserialize(#[source] serde_json::Error),
}

const MAX_ATTEMPTS: u32 = 5;

/// Backoff schedule: 1s, 2s, 4s, 8s, 16s, capped at 5 attempts.
fn backoff_for_attempt(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(4))
}

fn is_transient(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    bucket: Arc<TokenBucket>,
}

impl ProviderClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, bucket: Arc<TokenBucket>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            bucket,
        }
    }

    pub async fn list_catalog(
        &self,
        limit: u32,
        offset: u32,
        created_since: Option<DateTime<Utc>>,
    ) -> Result<RawCatalogPage, ProviderError> {
        let mut query = vec![
            ("limit".to_string(), limit.to_string()),
            ("offset".to_string(), offset.to_string()),
            ("order[createdAt]".to_string(), "asc".to_string()),
            ("includes[]".to_string(), "cover_art".to_string()),
            ("includes[]".to_string(), "author".to_string()),
            ("contentRating[]".to_string(), "safe".to_string()),
            ("contentRating[]".to_string(), "suggestive".to_string()),
            ("hasAvailableChapters".to_string(), "true".to_string()),
        ];
        if let Some(since) = created_since {
            query.push(("createdAtSince".to_string(), since.to_rfc3339()));
        }

        let url = format!("{}/manga", self.base_url);
        self.execute_with_retry(&url, &query).await
    }

    pub async fn get_feed(
        &self,
        external_id: &str,
        limit: u32,
        order: FeedOrder,
    ) -> Result<RawFeedPage, ProviderError> {
        let query = vec![
            ("limit".to_string(), limit.to_string()),
            ("order[chapter]".to_string(), order.as_query_value().to_string()),
        ];

        let url = format!("{}/manga/{}/feed", self.base_url, external_id);
        self.execute_with_retry(&url, &query).await
    }

    async fn execute_with_retry<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<T, ProviderError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.bucket.acquire().await;

            match self.execute_once(url, query).await {
                Ok(body) => return Ok(body),
                Err(ProviderError::ClientError(err)) => return Err(ProviderError::ClientError(err)),
                Err(err) if attempt < MAX_ATTEMPTS => {
                    let wait = backoff_for_attempt(attempt - 1);
                    warn!("provider request to {url} failed (attempt {attempt}/{MAX_ATTEMPTS}): {err}. Retrying in {wait:?}");
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn execute_once<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<T, ProviderError> {
        let mut builder = self.http.get(url).query(query);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let request = builder.build().map_err(ProviderError::RequestBuild)?;
        debug!("fetching {}", request.url());

        let response = self
            .http
            .execute(request)
            .await
            .map_err(ProviderError::RequestExecute)?;

        let status = response.status();
        if !status.is_success() {
            let err = response.error_for_status().unwrap_err();
            return if is_transient(status) {
                Err(ProviderError::RequestExecute(err))
            } else {
                Err(ProviderError::ClientError(err))
            };
        }

        let body = response.text().await.map_err(ProviderError::ResponseBody)?;
        serde_json::from_str(&body).map_err(ProviderError::Deserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_is_1_2_4_8_16_capped() {
        assert_eq!(backoff_for_attempt(0), Duration::from_secs(1));
        assert_eq!(backoff_for_attempt(1), Duration::from_secs(2));
        assert_eq!(backoff_for_attempt(2), Duration::from_secs(4));
        assert_eq!(backoff_for_attempt(3), Duration::from_secs(8));
        assert_eq!(backoff_for_attempt(4), Duration::from_secs(16));
        // Capped
        assert_eq!(backoff_for_attempt(10), Duration::from_secs(16));
    }

    #[test]
    fn transient_status_codes() {
        assert!(is_transient(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_transient(reqwest::StatusCode::BAD_GATEWAY));
        assert!(!is_transient(reqwest::StatusCode::BAD_REQUEST));
        assert!(!is_transient(reqwest::StatusCode::NOT_FOUND));
    }
}
