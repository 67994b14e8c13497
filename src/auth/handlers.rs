use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, instrument};

use crate::{
    auth::{
        dto::{LoginResponse, MessageResponse, PublicUser},
        extractors::MaybeUser,
        forms::{ChangePasswordForm, DeactivateForm, LoginForm, RegisterForm},
        services::{self, CurrentUser},
    },
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", get(logout))
        .route("/auth/password", post(change_password))
        .route("/auth/deactivate", post(deactivate))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

/// Signed-in callers are sent to the landing page instead.
fn already_signed_in(current: &Option<CurrentUser>) -> Option<Response> {
    current.as_ref().map(|c| {
        debug!(user_id = c.user.id, "already signed in; redirecting");
        Redirect::to("/").into_response()
    })
}

#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    MaybeUser(current): MaybeUser,
    Form(form): Form<RegisterForm>,
) -> Result<Response, AppError> {
    if let Some(redirect) = already_signed_in(&current) {
        return Ok(redirect);
    }
    let user = services::register_user(&state, &form).await?;
    Ok((StatusCode::CREATED, Json(PublicUser::from(user))).into_response())
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    MaybeUser(current): MaybeUser,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    if let Some(redirect) = already_signed_in(&current) {
        return Ok(redirect);
    }
    let outcome = services::login(&state, &form).await?;
    let cookie = state.keys.cookie(outcome.token.clone(), outcome.session.remember);
    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            token: outcome.token,
            expires_at: outcome.session.expires_at,
            remember: outcome.session.remember,
            user: outcome.user.into(),
        }),
    )
        .into_response())
}

#[instrument(skip_all, fields(user_id = current.user.id))]
pub async fn logout(
    State(state): State<AppState>,
    current: CurrentUser,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), AppError> {
    services::logout(&state, &current).await?;
    Ok((
        state.keys.clear_cookie(jar),
        Json(MessageResponse {
            message: "You have been logged out.",
        }),
    ))
}

#[instrument(skip_all, fields(user_id = current.user.id))]
pub async fn change_password(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<ChangePasswordForm>,
) -> Result<Json<MessageResponse>, AppError> {
    services::change_password(&state, &current, &form).await?;
    Ok(Json(MessageResponse {
        message: "Your password has been updated.",
    }))
}

#[instrument(skip_all, fields(user_id = current.user.id))]
pub async fn deactivate(
    State(state): State<AppState>,
    current: CurrentUser,
    jar: CookieJar,
    Form(form): Form<DeactivateForm>,
) -> Result<(CookieJar, Json<MessageResponse>), AppError> {
    services::deactivate(&state, &current, &form).await?;
    Ok((
        state.keys.clear_cookie(jar),
        Json(MessageResponse {
            message: "Your account has been deactivated.",
        }),
    ))
}

#[instrument(skip_all, fields(user_id = current.user.id))]
pub async fn get_me(current: CurrentUser) -> Json<PublicUser> {
    Json(current.user.into())
}
