use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, PartialEq, Deserialize)]
struct PostgresConfig {
    host: String,
    user: String,
    password: Option<String>,
    password_file: Option<PathBuf>,
    db: String,
}

/// Builds a `postgres://` connection string from `POSTGRES_*` environment
/// variables, so operators don't have to hand-assemble and
/// percent-encode a connection string themselves.
pub fn postgres_url_from_environment() -> String {
    let provider = figment::providers::Env::prefixed("POSTGRES_");
    let config: PostgresConfig = figment::Figment::from(provider)
        .extract()
        .expect("Postgres configuration environment variable(s) missing or invalid");

    let password = match (config.password, config.password_file) {
        (Some(pw), _) => pw,
        (None, Some(path)) => {
            std::fs::read_to_string(&path).expect("failed to read postgres password file")
        }
        (None, None) => panic!("one of POSTGRES_PASSWORD or POSTGRES_PASSWORD_FILE must be set"),
    };

    let password = password.strip_suffix('\n').unwrap_or(&password);
    assert!(
        !password.contains('\n'),
        "postgres password contains a non-terminal newline, refusing to silently truncate it"
    );

    let password = utf8_percent_encode(password, NON_ALPHANUMERIC);

    format!("postgres://{}:{}@{}/{}", config.user, password, config.host, config.db)
}
