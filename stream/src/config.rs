use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AdmissionConfig {
    pub refill_per_second: f64,
    pub burst: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            refill_per_second: 50.0,
            burst: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StreamConfig {
    pub bind_addr: String,
    pub admission: AdmissionConfig,
    pub handshake_deadline_secs: u64,
    pub steady_state_deadline_secs: u64,
    pub max_message_bytes: usize,
    pub cache_url: String,
    pub cache_ttl_days: i64,
    pub write_channel_capacity: usize,
    pub batch_size: usize,
    pub batch_flush_interval_secs: u64,
    pub durable_fallback_deadline_ms: u64,
    pub shutdown_warning_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9003".to_string(),
            admission: AdmissionConfig::default(),
            handshake_deadline_secs: 10,
            steady_state_deadline_secs: 300,
            max_message_bytes: 1024 * 1024,
            cache_url: "redis://127.0.0.1/".to_string(),
            cache_ttl_days: 90,
            write_channel_capacity: 10_000,
            batch_size: 1_000,
            batch_flush_interval_secs: 300,
            durable_fallback_deadline_ms: 500,
            shutdown_warning_secs: 5,
        }
    }
}

impl StreamConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("Catalog.toml"))
            .merge(Env::prefixed("STREAM_"))
    }

    pub fn config() -> figment::Result<Self> {
        Self::figment().extract()
    }
}
