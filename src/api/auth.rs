//! Account endpoints: registration with email verification, login, password
//! recovery, and profile management.

use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::crypto;
use crate::db::{self, User, UserResponse};
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::guard::{check, CurrentUser, Gate};
use super::uploads;
use super::validation;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub password: String,
    pub confirm_password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

fn session_cookie(token: &str) -> Cookie<'static> {
    // No max-age: the credential itself carries the expiry
    Cookie::build(("token", token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build(("token", ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Issue a session for the account and return it in both the cookie and the
/// response body.
fn issue_session(
    state: &AppState,
    jar: CookieJar,
    user: User,
    message: &str,
) -> Result<(CookieJar, Json<Value>), ApiError> {
    let token = crypto::sign_session(
        &user,
        &state.config.auth.jwt_secret,
        state.config.auth.jwt_expires_days,
    )?;
    let jar = jar.add(session_cookie(&token));
    Ok((
        jar,
        Json(json!({
            "success": true,
            "message": message,
            "token": token,
            "user": UserResponse::from(user),
        })),
    ))
}

/// POST /api/v1/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<Value>, ApiError> {
    let name = request.name.trim();
    let email = request.email.trim().to_lowercase();

    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validation::validate_name(name) {
        errors.add("name", e);
    }
    if let Err(e) = validation::validate_email(&email) {
        errors.add("email", e);
    }
    if let Err(e) = validation::validate_password(&request.password) {
        errors.add("password", e);
    }
    errors.finish()?;

    // A verified account already owns this email. An unverified one may
    // restart registration and get a fresh link.
    if let Some(existing) = db::find_user_by_email(&state.db, &email).await? {
        if existing.is_verified {
            return Err(ApiError::conflict("An account with this email already exists"));
        }
    }

    let password_hash = crypto::hash_password(&request.password)?;
    let token = crypto::generate_token();
    let token_hash = crypto::hash_token(&token);

    db::stage_pending_registration(
        &state.db,
        name,
        &email,
        &password_hash,
        &token_hash,
        crypto::verification_expiry(),
    )
    .await?;

    let verify_url = format!(
        "{}/verify-email?token={}&email={}",
        state.config.frontend.url, token, email
    );
    if let Err(e) = state
        .mailer
        .send_verification_email(&email, name, &verify_url)
        .await
    {
        error!(error = %e, email = %email, "Failed to send verification email");
        // Without the email the staged registration is unreachable
        db::discard_pending_registration(&state.db, &email).await?;
        return Err(ApiError::internal(
            "Failed to send verification email, please try again",
        ));
    }

    info!(email = %email, "Registration staged, verification link sent");
    Ok(Json(json!({
        "success": true,
        "message": "Verification link sent to your email",
    })))
}

/// GET /api/v1/auth/verify-email?token=..&email=..
pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(CookieJar, Json<Value>), ApiError> {
    let token = params
        .get("token")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("Verification token is required"))?;
    let email = params
        .get("email")
        .filter(|e| !e.is_empty())
        .map(|e| e.trim().to_lowercase())
        .ok_or_else(|| ApiError::bad_request("Email is required"))?;

    // Re-clicking the link after verification succeeds, but never mints a
    // session: the token is not checked on this branch, so a credential here
    // would authenticate anyone who knows the email address.
    if let Some(user) = db::find_user_by_email(&state.db, &email).await? {
        if user.is_verified {
            return Ok((
                jar,
                Json(json!({
                    "success": true,
                    "message": "Email already verified. You can log in.",
                })),
            ));
        }
    }

    let token_hash = crypto::hash_token(token);
    let user = db::consume_pending_registration(&state.db, &email, &token_hash)
        .await?
        .ok_or_else(|| ApiError::bad_request("Invalid or expired verification link"))?;

    info!(email = %email, "Email verified, account activated");
    issue_session(&state, jar, user, "Email verified successfully")
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<Value>), ApiError> {
    let email = request.email.trim().to_lowercase();

    let user = db::find_user_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password"))?;

    if !crypto::verify_password(&request.password, &user.password_hash) {
        return Err(ApiError::unauthorized("Invalid email or password"));
    }

    // Unverified accounts surface as 403 via the credential error mapping
    issue_session(&state, jar, user, "Login successful")
}

/// GET /api/v1/auth/logout
pub async fn logout(jar: CookieJar) -> (CookieJar, Json<Value>) {
    let jar = jar.remove(clear_session_cookie());
    (
        jar,
        Json(json!({
            "success": true,
            "message": "Logged out successfully",
        })),
    )
}

/// POST /api/v1/auth/password/forgot
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    let email = request.email.trim().to_lowercase();
    validation::validate_email(&email).map_err(|e| ApiError::validation_field("email", e))?;

    let user = db::find_user_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| ApiError::not_found("No account found with that email"))?;

    let token = crypto::generate_token();
    db::set_reset_token(
        &state.db,
        &user.id,
        &crypto::hash_token(&token),
        crypto::reset_expiry(),
    )
    .await?;

    let reset_url = format!("{}/reset-password/{}", state.config.frontend.url, token);
    if let Err(e) = state
        .mailer
        .send_password_reset_email(&email, &user.name, &reset_url)
        .await
    {
        error!(error = %e, email = %email, "Failed to send password reset email");
        db::clear_reset_token(&state.db, &user.id).await?;
        return Err(ApiError::internal(
            "Failed to send password reset email, please try again",
        ));
    }

    info!(email = %email, "Password reset link sent");
    Ok(Json(json!({
        "success": true,
        "message": "Password reset link sent to your email",
    })))
}

/// POST /api/v1/auth/password/reset/:token
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(token): Path<String>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<(CookieJar, Json<Value>), ApiError> {
    if request.password != request.confirm_password {
        return Err(ApiError::bad_request("Passwords do not match"));
    }
    validation::validate_password(&request.password)
        .map_err(|e| ApiError::validation_field("password", e))?;

    let user = db::find_user_by_reset_token(&state.db, &crypto::hash_token(&token))
        .await?
        .ok_or_else(|| ApiError::bad_request("Invalid or expired reset token"))?;

    let password_hash = crypto::hash_password(&request.password)?;
    db::update_password(&state.db, &user.id, &password_hash).await?;

    info!(user = %user.id, "Password reset completed");
    let user = db::find_user_by_id(&state.db, &user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    issue_session(&state, jar, user, "Password reset successfully")
}

/// PUT /api/v1/auth/password/change
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    check(&user, &[Gate::Verified])?;

    if !crypto::verify_password(&request.old_password, &user.password_hash) {
        return Err(ApiError::unauthorized("Current password is incorrect"));
    }
    validation::validate_password(&request.new_password)
        .map_err(|e| ApiError::validation_field("newPassword", e))?;

    let password_hash = crypto::hash_password(&request.new_password)?;
    db::update_password(&state.db, &user.id, &password_hash).await?;

    info!(user = %user.id, "Password changed");
    Ok(Json(json!({
        "success": true,
        "message": "Password changed successfully",
    })))
}

/// GET /api/v1/auth/myprofile
pub async fn my_profile(CurrentUser(user): CurrentUser) -> Result<Json<Value>, ApiError> {
    check(&user, &[Gate::Verified])?;
    Ok(Json(json!({
        "success": true,
        "user": UserResponse::from(user),
    })))
}

/// PUT /api/v1/auth/update-profile (multipart: optional name, optional avatar)
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    check(&user, &[Gate::Verified])?;

    let mut name: Option<String> = None;
    let mut email: Option<String> = None;
    let mut avatar: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::bad_request("Malformed multipart request"))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("name") => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| ApiError::bad_request("Invalid name field"))?;
                let value = value.trim().to_string();
                validation::validate_name(&value)
                    .map_err(|e| ApiError::validation_field("name", e))?;
                name = Some(value);
            }
            Some("email") => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| ApiError::bad_request("Invalid email field"))?;
                let value = value.trim().to_lowercase();
                validation::validate_email(&value)
                    .map_err(|e| ApiError::validation_field("email", e))?;
                email = Some(value);
            }
            Some("avatar") => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::bad_request("Avatar must be a file"))?;
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::bad_request("Invalid avatar upload"))?;
                avatar =
                    Some(uploads::save_image(&state.config.server.uploads_dir, &file_name, &data).await?);
            }
            other => {
                warn!(field = ?other, "Ignoring unknown profile field");
            }
        }
    }

    let previous_avatar = user.avatar.clone();
    let updated = match db::update_profile(
        &state.db,
        &user.id,
        name.as_deref(),
        email.as_deref(),
        avatar.as_deref(),
    )
    .await
    {
        Ok(Some(updated)) => updated,
        other => {
            // The freshly written avatar file must not outlive a failed update
            // (e.g. the new email is already taken)
            if let Some(new) = &avatar {
                uploads::remove_images(&state.config.server.uploads_dir, &[new.clone()]).await;
            }
            return Err(match other {
                Err(e) => e.into(),
                _ => ApiError::not_found("User not found"),
            });
        }
    };

    // Replacing the avatar orphans the old file
    if avatar.is_some() {
        if let Some(old) = previous_avatar {
            uploads::remove_images(&state.config.server.uploads_dir, &[old]).await;
        }
    }

    Ok(Json(json!({
        "success": true,
        "message": "Profile updated successfully",
        "user": UserResponse::from(updated),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::test_pool;
    use chrono::Utc;

    async fn test_state() -> Arc<AppState> {
        let pool = test_pool().await;
        Arc::new(AppState::new(Config::default(), pool))
    }

    async fn seed_verified_user(state: &AppState, email: &str) {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, is_verified, role, created_at, updated_at) VALUES (?, 'Asha', ?, 'h', 1, 'user', ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(email)
        .bind(&now)
        .bind(&now)
        .execute(&state.db)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_verify_email_replay_never_issues_session() {
        let state = test_state().await;
        seed_verified_user(&state, "asha@example.com").await;

        // An arbitrary token against a verified account must not authenticate
        let mut params = HashMap::new();
        params.insert("token".to_string(), "totally-bogus".to_string());
        params.insert("email".to_string(), "asha@example.com".to_string());

        let (jar, Json(body)) =
            verify_email(State(state), CookieJar::new(), Query(params))
                .await
                .unwrap();

        assert_eq!(body["success"], true);
        assert!(body.get("token").is_none());
        assert!(body.get("user").is_none());
        assert!(jar.get("token").is_none());
    }

    #[tokio::test]
    async fn test_verify_email_rejects_bogus_token_for_unknown_account() {
        let state = test_state().await;

        let mut params = HashMap::new();
        params.insert("token".to_string(), "totally-bogus".to_string());
        params.insert("email".to_string(), "nobody@example.com".to_string());

        let result = verify_email(State(state), CookieJar::new(), Query(params)).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("abc123");
        assert_eq!(cookie.name(), "token");
        assert_eq!(cookie.value(), "abc123");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert!(cookie.max_age().is_none());
    }

    #[test]
    fn test_reset_request_uses_camel_case() {
        let parsed: ResetPasswordRequest = serde_json::from_value(json!({
            "password": "new-secret",
            "confirmPassword": "new-secret",
        }))
        .unwrap();
        assert_eq!(parsed.password, parsed.confirm_password);
    }

    #[test]
    fn test_change_request_uses_camel_case() {
        let parsed: ChangePasswordRequest = serde_json::from_value(json!({
            "oldPassword": "old",
            "newPassword": "new",
        }))
        .unwrap();
        assert_eq!(parsed.old_password, "old");
        assert_eq!(parsed.new_password, "new");
    }
}
