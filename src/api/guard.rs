//! Access control: request authentication and per-route authorization gates.
//!
//! Authentication resolves a bearer credential (header or cookie) to an
//! account. Authorization is an explicit ordered list of gates checked at the
//! top of each protected handler; the first failing gate short-circuits.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use crate::crypto;
use crate::db::{self, User};
use crate::AppState;

use super::error::ApiError;

/// The authenticated account making the request
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Pull the session token from the Authorization header or the token cookie
fn extract_token(parts: &Parts, jar: &CookieJar) -> Option<String> {
    if let Some(auth_header) = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }

    jar.get("token").map(|c| c.value().to_string())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = extract_token(parts, &jar)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

        let claims = crypto::decode_session(&token, &state.config.auth.jwt_secret)
            .map_err(|_| ApiError::unauthorized("Authentication required"))?;

        // A valid token for a since-deleted account is surfaced as 404,
        // not folded into a generic auth failure.
        let user = db::find_user_by_id(&state.db, &claims.sub)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))?;

        Ok(CurrentUser(user))
    }
}

/// A single authorization requirement
#[derive(Debug, Clone, Copy)]
pub enum Gate {
    /// The account's role must be one of these
    Role(&'static [&'static str]),
    /// The account must have a verified email
    Verified,
}

/// Check an ordered list of gates against the acting account.
/// Each gate short-circuits; later gates never run after a failure.
pub fn check(user: &User, gates: &[Gate]) -> Result<(), ApiError> {
    for gate in gates {
        match gate {
            Gate::Role(roles) => {
                if !roles.contains(&user.role.as_str()) {
                    return Err(ApiError::forbidden(format!(
                        "Role {} is not authorized to access this resource",
                        user.role
                    )));
                }
            }
            Gate::Verified => {
                if !user.is_verified {
                    return Err(ApiError::forbidden(
                        "Please verify your email to access this resource",
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Ownership gate: the acting account must be the resource's owner
pub fn require_owner(user: &User, owner: Option<&str>) -> Result<(), ApiError> {
    match owner {
        Some(owner_id) if owner_id == user.id => Ok(()),
        _ => Err(ApiError::forbidden(
            "You are not authorized to modify this resource",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;
    use chrono::Utc;

    fn test_user(role: &str, verified: bool) -> User {
        User {
            id: "u-1".to_string(),
            name: "Asha".to_string(),
            email: "asha@example.com".to_string(),
            password_hash: String::new(),
            is_verified: verified,
            role: role.to_string(),
            avatar: None,
            reset_token_hash: None,
            reset_token_expires: None,
            created_at: Utc::now().to_rfc3339(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_role_gate_names_actual_role() {
        let user = test_user("user", true);
        let err = check(&user, &[Gate::Role(&["admin"])]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
        assert!(err.message().contains("Role user"));
    }

    #[test]
    fn test_role_gate_passes_admin() {
        let user = test_user("admin", true);
        assert!(check(&user, &[Gate::Role(&["admin"])]).is_ok());
    }

    #[test]
    fn test_verified_gate() {
        let user = test_user("user", false);
        let err = check(&user, &[Gate::Verified]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
        assert!(err.message().contains("verify your email"));

        let user = test_user("user", true);
        assert!(check(&user, &[Gate::Verified]).is_ok());
    }

    #[test]
    fn test_gates_short_circuit_in_order() {
        // Unverified non-admin: the role gate fires first, so the message
        // names the role, not the verification state.
        let user = test_user("user", false);
        let err = check(&user, &[Gate::Role(&["admin"]), Gate::Verified]).unwrap_err();
        assert!(err.message().contains("Role user"));
    }

    #[test]
    fn test_ownership_gate() {
        let user = test_user("user", true);
        assert!(require_owner(&user, Some("u-1")).is_ok());
        assert!(require_owner(&user, Some("u-2")).is_err());
        assert!(require_owner(&user, None).is_err());
    }
}
