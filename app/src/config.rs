use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Configuration that doesn't belong to any one subsystem: the pool size
/// shared by every crate that touches Postgres, the request-authentication
/// service this process delegates the stream handshake to, and the
/// operator-facing TLS/CORS surface spec.md §6 enumerates but which the
/// out-of-scope HTTP layer ultimately terminates.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    pub db_pool_size: u32,
    pub auth_base_url: String,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    #[serde(default)]
    pub cors_allowlist: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_pool_size: 10,
            auth_base_url: "http://127.0.0.1:9000".to_string(),
            tls_cert_path: None,
            tls_key_path: None,
            cors_allowlist: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("Catalog.toml"))
            .merge(Env::prefixed("APP_"))
    }

    pub fn config() -> figment::Result<Self> {
        Self::figment().extract()
    }
}
