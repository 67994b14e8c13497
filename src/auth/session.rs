use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::config::SessionConfig;

/// Payload of the signed session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub sub: String,    // user id
    pub sid: Uuid,      // user_sessions.id
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
    #[serde(default)]
    pub remember: bool,
}

/// Signing material and lifetimes for session tokens and their cookie.
#[derive(Clone)]
pub struct SessionKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub cookie_name: String,
    pub secure_cookie: bool,
    pub ttl: Duration,
    pub remember_ttl: Duration,
}

impl From<&SessionConfig> for SessionKeys {
    fn from(cfg: &SessionConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            cookie_name: cfg.cookie_name.clone(),
            secure_cookie: cfg.secure_cookie,
            ttl: Duration::minutes(cfg.ttl_minutes),
            remember_ttl: Duration::days(cfg.remember_days),
        }
    }
}

impl SessionClaims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

impl SessionKeys {
    pub fn lifetime(&self, remember: bool) -> Duration {
        if remember {
            self.remember_ttl
        } else {
            self.ttl
        }
    }

    pub fn sign(
        &self,
        user_id: i64,
        session_id: Uuid,
        remember: bool,
        issued_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<String> {
        let claims = SessionClaims {
            sub: user_id.to_string(),
            sid: session_id,
            iat: issued_at.unix_timestamp() as usize,
            exp: expires_at.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            remember,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id, session_id = %session_id, remember, "session token signed");
        Ok(token)
    }

    /// Checks signature, issuer, audience and expiry.
    pub fn verify(&self, token: &str) -> anyhow::Result<SessionClaims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.leeway = 0;
        let data = decode::<SessionClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    /// Remembered sessions get a persistent cookie; others end with the browser.
    pub fn cookie(&self, token: String, remember: bool) -> Cookie<'static> {
        let mut builder = Cookie::build((self.cookie_name.clone(), token))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookie);
        if remember {
            builder = builder.max_age(self.remember_ttl);
        }
        builder.build()
    }

    pub fn clear_cookie(&self, jar: CookieJar) -> CookieJar {
        jar.remove(Cookie::build(self.cookie_name.clone()).path("/"))
    }

    /// Candidate session tokens in the order they are tried: the cookie, then
    /// an `Authorization: Bearer` header.
    pub fn tokens_from(&self, jar: &CookieJar, headers: &axum::http::HeaderMap) -> Vec<String> {
        let cookie = jar.get(&self.cookie_name).map(|c| c.value().to_string());
        let bearer = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
            .map(|t| t.trim().to_string());
        cookie
            .into_iter()
            .chain(bearer)
            .filter(|t| !t.is_empty())
            .collect()
    }
}
