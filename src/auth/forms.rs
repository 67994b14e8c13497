use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer};

use crate::error::FieldErrors;

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 64;
pub const EMAIL_MAX: usize = 120;
pub const PASSWORD_MIN: usize = 8;

pub const USERNAME_TAKEN: &str = "This username is already taken. Please choose a different one.";
pub const EMAIL_TAKEN: &str =
    "This email is already registered. Please use a different one or log in.";
pub const USERNAME_HAS_AT: &str = "Username cannot contain @";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Registration form. Missing fields deserialize as empty strings so they
/// surface as field errors instead of extractor rejections.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default, alias = "email", alias = "username")]
    pub identifier: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, alias = "remember_me", deserialize_with = "checkbox")]
    pub remember: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangePasswordForm {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub new_password_confirm: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeactivateForm {
    #[serde(default)]
    pub password: String,
}

/// Registration input after trimming and email normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanRegistration {
    pub username: String,
    pub email: String,
}

impl RegisterForm {
    /// Checks every field-local rule and collects all failures. Uniqueness
    /// needs the store and is checked by the caller.
    pub fn validate(&self) -> Result<CleanRegistration, FieldErrors> {
        let mut errors = FieldErrors::new();

        let username = self.username.trim();
        let username_len = username.chars().count();
        if username.is_empty() {
            errors.add("username", "Username is required");
        } else if !(USERNAME_MIN..=USERNAME_MAX).contains(&username_len) {
            errors.add("username", "Username must be between 3 and 64 characters");
        }
        // Login routes identifiers with `@` to the email column, so a username
        // must never look like one.
        if username.contains('@') {
            errors.add("username", USERNAME_HAS_AT);
        }

        let email = self.email.trim().to_lowercase();
        if email.is_empty() {
            errors.add("email", "Email is required");
        } else {
            if !is_valid_email(&email) {
                errors.add("email", "Valid email address required");
            }
            if email.chars().count() > EMAIL_MAX {
                errors.add("email", "Email must be less than 120 characters");
            }
        }

        check_new_password(
            &mut errors,
            ("password", &self.password),
            ("password_confirm", &self.password_confirm),
        );

        if errors.is_empty() {
            Ok(CleanRegistration {
                username: username.to_string(),
                email,
            })
        } else {
            Err(errors)
        }
    }
}

impl LoginForm {
    /// Presence only. A short password is a failed login, not a form error.
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if self.identifier.trim().is_empty() {
            errors.add("identifier", "Email or username is required");
        }
        if self.password.is_empty() {
            errors.add("password", "Password is required");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl ChangePasswordForm {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if self.current_password.is_empty() {
            errors.add("current_password", "Current password is required");
        }
        check_new_password(
            &mut errors,
            ("new_password", &self.new_password),
            ("new_password_confirm", &self.new_password_confirm),
        );
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_new_password(
    errors: &mut FieldErrors,
    (field, password): (&'static str, &str),
    (confirm_field, confirm): (&'static str, &str),
) {
    if password.is_empty() {
        errors.add(field, "Password is required");
    } else if password.chars().count() < PASSWORD_MIN {
        errors.add(field, "Password must be at least 8 characters");
    }

    if confirm.is_empty() {
        errors.add(confirm_field, "Password confirmation is required");
    } else if confirm != password {
        errors.add(confirm_field, "Passwords must match");
    }
}

/// HTML checkboxes post `on` (or nothing); APIs tend to send `true`.
fn checkbox<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "on" | "true" | "1" | "y" | "yes"
    ))
}
