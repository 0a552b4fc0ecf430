use async_trait::async_trait;
use serde::Deserialize;

/// The bound identity of an authenticated connection, as handed back by
/// the opaque token validator (spec.md §1 treats request authentication
/// as an external collaborator: "an opaque token validator returning
/// `{user_id, role, scopes}`").
#[derive(Debug, Clone)]
pub struct AuthedIdentity {
    pub user_id: i32,
    pub username: String,
    pub role: String,
    pub scopes: Vec<String>,
}

/// The interface the progress stream server depends on for the
/// handshake. A `None` return means the token was rejected; this trait
/// intentionally carries no error detail beyond that, matching the
/// auth_response frame's boolean `success` field.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Option<AuthedIdentity>;
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    user_id: i32,
    username: String,
    role: String,
    #[serde(default)]
    scopes: Vec<String>,
}

/// Calls out to the out-of-scope request-authentication service over
/// HTTP. This is the production `Authenticator`; the validator itself is
/// not redesigned here, only its interface to the stream server.
pub struct HttpAuthenticator {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAuthenticator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authenticate(&self, token: &str) -> Option<AuthedIdentity> {
        let response = self
            .http
            .get(format!("{}/auth/validate", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }

        let body: ValidateResponse = response.json().await.ok()?;
        Some(AuthedIdentity {
            user_id: body.user_id,
            username: body.username,
            role: body.role,
            scopes: body.scopes,
        })
    }
}

/// Test-only in-memory authenticator, exposed unconditionally so other
/// crates' tests (e.g. `app`'s) can construct a `StreamServer` without a
/// live auth service.
pub mod test_support {
    use super::*;
    use hashbrown::HashMap;
    use std::sync::RwLock;

    /// An in-memory authenticator for tests: a fixed map from token to
    /// identity, no network involved.
    pub struct StaticAuthenticator {
        tokens: RwLock<HashMap<String, AuthedIdentity>>,
    }

    impl StaticAuthenticator {
        pub fn new() -> Self {
            Self {
                tokens: RwLock::new(HashMap::new()),
            }
        }

        pub fn insert(&self, token: impl Into<String>, identity: AuthedIdentity) {
            self.tokens
                .write()
                .expect("static authenticator lock poisoned")
                .insert(token.into(), identity);
        }
    }

    #[async_trait]
    impl Authenticator for StaticAuthenticator {
        async fn authenticate(&self, token: &str) -> Option<AuthedIdentity> {
            self.tokens
                .read()
                .expect("static authenticator lock poisoned")
                .get(token)
                .cloned()
        }
    }
}
