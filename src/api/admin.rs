//! Administrator endpoints: user management and the dashboard summary.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::db::{self, UpdateUser, UserResponse};
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::guard::{check, CurrentUser, Gate};
use super::validation;

const ADMIN: &[Gate] = &[Gate::Role(&["admin"]), Gate::Verified];

/// Dashboard summary counters
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_users: i64,
    pub total_reports: i64,
    pub pending_reports: i64,
    pub in_progress_reports: i64,
    pub resolved_reports: i64,
    /// Percentage of reports resolved, 0 when there are none
    pub resolution_rate: f64,
}

/// GET /api/v1/admin/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Value>, ApiError> {
    check(&user, ADMIN)?;

    let users: Vec<UserResponse> = db::list_users(&state.db)
        .await?
        .into_iter()
        .map(UserResponse::from)
        .collect();

    Ok(Json(json!({
        "success": true,
        "count": users.len(),
        "users": users,
    })))
}

/// GET /api/v1/admin/users/:id
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    check(&user, ADMIN)?;

    let target = db::find_user_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(json!({
        "success": true,
        "user": UserResponse::from(target),
    })))
}

/// PUT /api/v1/admin/users/:id
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(update): Json<UpdateUser>,
) -> Result<Json<Value>, ApiError> {
    check(&user, ADMIN)?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &update.name {
        if let Err(e) = validation::validate_name(name) {
            errors.add("name", e);
        }
    }
    if let Some(email) = &update.email {
        if let Err(e) = validation::validate_email(email) {
            errors.add("email", e);
        }
    }
    if let Some(role) = &update.role {
        if role != "user" && role != "admin" {
            errors.add("role", "Role must be either user or admin");
        }
    }
    errors.finish()?;

    let target = db::update_user(&state.db, &id, &update)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    info!(user = %id, admin = %user.id, "User updated");
    Ok(Json(json!({
        "success": true,
        "message": "User updated successfully",
        "user": UserResponse::from(target),
    })))
}

/// DELETE /api/v1/admin/users/:id
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    check(&user, ADMIN)?;

    if id == user.id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    if !db::delete_user(&state.db, &id).await? {
        return Err(ApiError::not_found("User not found"));
    }

    info!(user = %id, admin = %user.id, "User deleted");
    Ok(Json(json!({
        "success": true,
        "message": "User deleted successfully",
    })))
}

/// PUT /api/v1/admin/users/:id/promote
pub async fn promote_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    check(&user, ADMIN)?;

    let target = db::find_user_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if target.role == "admin" {
        return Err(ApiError::bad_request("User is already an admin"));
    }

    let update = UpdateUser {
        role: Some("admin".to_string()),
        ..Default::default()
    };
    let target = db::update_user(&state.db, &id, &update)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    info!(user = %id, admin = %user.id, "User promoted to admin");
    Ok(Json(json!({
        "success": true,
        "message": "User promoted to admin",
        "user": UserResponse::from(target),
    })))
}

/// GET /api/v1/admin/stats
pub async fn stats(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Value>, ApiError> {
    check(&user, ADMIN)?;

    let total_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&state.db)
        .await?;
    let total_reports: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM issues")
        .fetch_one(&state.db)
        .await?;
    let count_status = |status: &'static str| {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM issues WHERE status = ?").bind(status)
    };
    let pending = count_status("Pending").fetch_one(&state.db).await?;
    let in_progress = count_status("In Progress").fetch_one(&state.db).await?;
    let resolved = count_status("Resolved").fetch_one(&state.db).await?;

    let resolution_rate = if total_reports > 0 {
        (resolved as f64 / total_reports as f64) * 100.0
    } else {
        0.0
    };

    let recent_users: Vec<UserResponse> =
        sqlx::query_as::<_, db::User>("SELECT * FROM users ORDER BY created_at DESC LIMIT 5")
            .fetch_all(&state.db)
            .await?
            .into_iter()
            .map(UserResponse::from)
            .collect();

    let recent_rows: Vec<db::IssueRow> =
        sqlx::query_as("SELECT * FROM issues ORDER BY created_at DESC LIMIT 5")
            .fetch_all(&state.db)
            .await?;
    let mut recent_reports = Vec::with_capacity(recent_rows.len());
    for row in recent_rows {
        recent_reports.push(db::load_detail(&state.db, row).await?);
    }

    let stats = DashboardStats {
        total_users,
        total_reports,
        pending_reports: pending,
        in_progress_reports: in_progress,
        resolved_reports: resolved,
        resolution_rate,
    };

    Ok(Json(json!({
        "success": true,
        "stats": stats,
        "recentUsers": recent_users,
        "recentReports": recent_reports,
    })))
}
