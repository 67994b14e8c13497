use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

/// Signing key used outside production when `SESSION_SECRET` is unset.
pub const DEV_SECRET: &str = "dev-key-please-change-in-production";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Testing,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "default" | "development" | "dev" => Ok(Self::Development),
            "testing" | "test" => Ok(Self::Testing),
            "production" | "prod" => Ok(Self::Production),
            other => anyhow::bail!("unknown APP_ENV {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub cookie_name: String,
    pub ttl_minutes: i64,
    pub remember_days: i64,
    pub secure_cookie: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database_url: String,
    pub max_db_connections: u32,
    pub session: SessionConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup so it can be
    /// exercised without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = Environment::parse(&lookup("APP_ENV").unwrap_or_default())?;

        let database_url = lookup("DATABASE_URL")
            .or_else(|| lookup("DATABASE_URI"))
            .context("DATABASE_URL is not set")?;

        let secret = match lookup("SESSION_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None if environment == Environment::Production => {
                anyhow::bail!("SESSION_SECRET must be set in production")
            }
            None => {
                warn!("SESSION_SECRET not set; using the development key");
                DEV_SECRET.to_string()
            }
        };

        let session = SessionConfig {
            secret,
            issuer: lookup("SESSION_ISSUER").unwrap_or_else(|| "fugue".into()),
            audience: lookup("SESSION_AUDIENCE").unwrap_or_else(|| "fugue-web".into()),
            cookie_name: lookup("SESSION_COOKIE_NAME").unwrap_or_else(|| "fugue_session".into()),
            ttl_minutes: parse_or(&lookup, "SESSION_TTL_MINUTES", 60 * 24)?,
            remember_days: parse_or(&lookup, "SESSION_REMEMBER_DAYS", 30)?,
            secure_cookie: environment == Environment::Production,
        };

        Ok(Self {
            environment,
            database_url,
            max_db_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            session,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn development_defaults() {
        let cfg = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x/db")]))
            .expect("config");
        assert_eq!(cfg.environment, Environment::Development);
        assert_eq!(cfg.database_url, "postgres://x/db");
        assert_eq!(cfg.max_db_connections, 10);
        assert_eq!(cfg.session.secret, DEV_SECRET);
        assert_eq!(cfg.session.cookie_name, "fugue_session");
        assert_eq!(cfg.session.ttl_minutes, 1440);
        assert_eq!(cfg.session.remember_days, 30);
        assert!(!cfg.session.secure_cookie);
    }

    #[test]
    fn falls_back_to_database_uri() {
        let cfg = AppConfig::from_lookup(lookup_from(&[("DATABASE_URI", "postgres://y/db")]))
            .expect("config");
        assert_eq!(cfg.database_url, "postgres://y/db");
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = AppConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn production_requires_secret_and_secure_cookie() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("APP_ENV", "production"),
            ("DATABASE_URL", "postgres://x/db"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SESSION_SECRET"));

        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("APP_ENV", "production"),
            ("DATABASE_URL", "postgres://x/db"),
            ("SESSION_SECRET", "s3cret"),
            ("SESSION_TTL_MINUTES", "15"),
        ]))
        .expect("config");
        assert_eq!(cfg.environment, Environment::Production);
        assert!(cfg.session.secure_cookie);
        assert_eq!(cfg.session.ttl_minutes, 15);
    }

    #[test]
    fn rejects_garbage_numbers_and_unknown_env() {
        assert!(AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x/db"),
            ("SESSION_REMEMBER_DAYS", "forever"),
        ]))
        .is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x/db"),
            ("APP_ENV", "staging"),
        ]))
        .is_err());
    }
}
