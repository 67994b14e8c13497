use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::CookieJar;

use crate::{
    auth::services::{resolve_session, CurrentUser},
    error::AppError,
    state::AppState,
};

/// Resolved session for this request, or `None` when anonymous. A cookie that
/// does not resolve falls through to the bearer token.
pub struct MaybeUser(pub Option<CurrentUser>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        for token in state.keys.tokens_from(&jar, &parts.headers) {
            if let Some(current) = resolve_session(state, &token).await? {
                return Ok(MaybeUser(Some(current)));
            }
        }
        Ok(MaybeUser(None))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        MaybeUser::from_request_parts(parts, state)
            .await?
            .0
            .ok_or(AppError::Unauthenticated)
    }
}
