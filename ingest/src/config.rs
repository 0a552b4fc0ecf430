use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub refill_per_second: f64,
    pub burst: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            refill_per_second: 5.0,
            burst: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { worker_count: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IngestConfig {
    pub provider_base_url: String,
    pub provider_api_key: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub worker_pool: WorkerPoolConfig,
    pub initial_sync_count: u32,
    pub new_manga_poll_cadence_hours: i64,
    pub chapter_check_cadence_hours: i64,
    pub chapter_check_batch_size: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            provider_base_url: "https://api.example-catalog.test".to_string(),
            provider_api_key: None,
            rate_limit: RateLimitConfig::default(),
            worker_pool: WorkerPoolConfig::default(),
            initial_sync_count: 150,
            new_manga_poll_cadence_hours: 24,
            chapter_check_cadence_hours: 48,
            chapter_check_batch_size: 50,
        }
    }
}

impl IngestConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("Catalog.toml"))
            .merge(Env::prefixed("INGEST_"))
    }

    pub fn config() -> figment::Result<Self> {
        Self::figment().extract()
    }
}
