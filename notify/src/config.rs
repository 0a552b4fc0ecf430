use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NotifyConfig {
    pub udp_bind_addr: String,
    pub http_bind_addr: String,
    pub inactivity_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    pub reconnect_sync_spacing_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            udp_bind_addr: "0.0.0.0:9001".to_string(),
            http_bind_addr: "127.0.0.1:9002".to_string(),
            inactivity_timeout_secs: 300,
            cleanup_interval_secs: 60,
            reconnect_sync_spacing_ms: 50,
        }
    }
}

impl NotifyConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("Catalog.toml"))
            .merge(Env::prefixed("NOTIFY_"))
    }

    pub fn config() -> figment::Result<Self> {
        Self::figment().extract()
    }
}
