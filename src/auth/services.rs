use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        forms::{
            ChangePasswordForm, DeactivateForm, LoginForm, RegisterForm, EMAIL_TAKEN,
            USERNAME_TAKEN,
        },
        repo::{RepoError, UniqueField},
        repo_types::{NewSession, NewUser, SessionRecord, User},
    },
    error::{AppError, FieldErrors},
    state::AppState,
};

/// An authenticated request: the live user row plus the session it came in on.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub session_id: Uuid,
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub user: User,
    pub session: SessionRecord,
    pub token: String,
}

impl From<RepoError> for AppError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::Conflict(UniqueField::Username) => {
                AppError::Validation(FieldErrors::single("username", USERNAME_TAKEN))
            }
            RepoError::Conflict(UniqueField::Email) => {
                AppError::Validation(FieldErrors::single("email", EMAIL_TAKEN))
            }
            RepoError::Database(e) => AppError::Internal(e.into()),
        }
    }
}

pub async fn register_user(state: &AppState, form: &RegisterForm) -> Result<User, AppError> {
    let clean = form.validate().map_err(AppError::Validation)?;

    let mut errors = FieldErrors::new();
    if state.users.exists_username(&clean.username).await? {
        errors.add("username", USERNAME_TAKEN);
    }
    if state.users.exists_email(&clean.email).await? {
        errors.add("email", EMAIL_TAKEN);
    }
    if !errors.is_empty() {
        warn!(username = %clean.username, "registration rejected: duplicate identity");
        return Err(AppError::Validation(errors));
    }

    let password_hash = state.passwords.hash(&form.password)?;

    // A concurrent registration can still win the race; the unique
    // constraint turns that into the same field error via `From<RepoError>`.
    let user = state
        .users
        .insert(NewUser {
            username: clean.username,
            email: clean.email,
            password_hash,
        })
        .await?;

    info!(user_id = user.id, username = %user.username, "user registered");
    Ok(user)
}

pub async fn login(state: &AppState, form: &LoginForm) -> Result<LoginOutcome, AppError> {
    form.validate().map_err(AppError::Validation)?;
    let identifier = form.identifier.trim();

    let found = state.users.find_by_username_or_email(identifier).await?;
    let verified = match &found {
        // An unreadable stored hash must look like any other failed login.
        Some(user) => match state.passwords.verify(&form.password, &user.password_hash) {
            Ok(ok) => ok,
            Err(e) => {
                error!(user_id = user.id, error = %e, "stored password hash unreadable");
                false
            }
        },
        None => {
            state.passwords.verify_dummy(&form.password);
            false
        }
    };

    let mut user = match found {
        Some(user) if verified && user.is_active => user,
        Some(user) => {
            warn!(user_id = user.id, active = user.is_active, "login rejected");
            return Err(AppError::Authentication);
        }
        None => {
            warn!("login for unknown identifier");
            return Err(AppError::Authentication);
        }
    };

    let now = OffsetDateTime::now_utc();
    match state.sessions.purge_stale(user.id, now).await {
        Ok(0) => {}
        Ok(purged) => debug!(user_id = user.id, purged, "stale sessions purged"),
        Err(e) => warn!(user_id = user.id, error = %e, "stale session purge failed"),
    }
    let session = state
        .sessions
        .create(NewSession {
            user_id: user.id,
            remember: form.remember,
            expires_at: now + state.keys.lifetime(form.remember),
        })
        .await?;
    let token = state
        .keys
        .sign(user.id, session.id, session.remember, now, session.expires_at)?;

    state.users.update_last_login(user.id, now).await?;
    user.last_login = Some(now);

    info!(user_id = user.id, session_id = %session.id, remember = session.remember, "user logged in");
    Ok(LoginOutcome {
        user,
        session,
        token,
    })
}

/// Maps a presented token to its user. Every kind of bad token (malformed,
/// forged, expired, revoked, orphaned, deactivated owner) yields `None`.
pub async fn resolve_session(
    state: &AppState,
    token: &str,
) -> Result<Option<CurrentUser>, AppError> {
    let claims = match state.keys.verify(token) {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "session token rejected");
            return Ok(None);
        }
    };
    let Some(user_id) = claims.user_id() else {
        return Ok(None);
    };

    let now = OffsetDateTime::now_utc();
    let Some(session) = state.sessions.find_active(claims.sid, now).await? else {
        debug!(session_id = %claims.sid, "session not active");
        return Ok(None);
    };
    if session.user_id != user_id {
        warn!(session_id = %session.id, "session/user mismatch");
        return Ok(None);
    }

    match state.users.find_by_id(user_id).await? {
        Some(user) if user.is_active => Ok(Some(CurrentUser {
            user,
            session_id: session.id,
        })),
        _ => Ok(None),
    }
}

pub async fn logout(state: &AppState, current: &CurrentUser) -> Result<(), AppError> {
    state.sessions.revoke(current.session_id).await?;
    info!(user_id = current.user.id, session_id = %current.session_id, "user logged out");
    Ok(())
}

/// Replaces the password hash and signs out every other session.
pub async fn change_password(
    state: &AppState,
    current: &CurrentUser,
    form: &ChangePasswordForm,
) -> Result<(), AppError> {
    form.validate().map_err(AppError::Validation)?;

    if !state
        .passwords
        .verify(&form.current_password, &current.user.password_hash)?
    {
        return Err(AppError::Validation(FieldErrors::single(
            "current_password",
            "Current password is incorrect",
        )));
    }

    let hash = state.passwords.hash(&form.new_password)?;
    state.users.update_password(current.user.id, &hash).await?;
    let revoked = state
        .sessions
        .revoke_all_for_user(current.user.id, Some(current.session_id))
        .await?;

    info!(user_id = current.user.id, revoked, "password changed");
    Ok(())
}

/// Soft delete: the row stays, the account can no longer sign in.
pub async fn deactivate(
    state: &AppState,
    current: &CurrentUser,
    form: &DeactivateForm,
) -> Result<(), AppError> {
    if form.password.is_empty() {
        return Err(AppError::Validation(FieldErrors::single(
            "password",
            "Password is required",
        )));
    }
    if !state
        .passwords
        .verify(&form.password, &current.user.password_hash)?
    {
        return Err(AppError::Validation(FieldErrors::single(
            "password",
            "Password is incorrect",
        )));
    }

    state.users.deactivate(current.user.id).await?;
    let revoked = state
        .sessions
        .revoke_all_for_user(current.user.id, None)
        .await?;

    info!(user_id = current.user.id, revoked, "account deactivated");
    Ok(())
}
