//! Issue endpoints: submission with duplicate aggregation, listing with
//! search/filter/pagination, per-user views, and admin management.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{self, NewReport, ReportOutcome, UpdateIssue};
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::guard::{check, require_owner, CurrentUser, Gate};
use super::query::ListParams;
use super::uploads;
use super::validation;

/// Most images accepted on a single submission
const MAX_IMAGES: usize = 5;

/// GET /api/v1/issue
pub async fn list_issues(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    check(&user, &[Gate::Verified])?;

    let params = ListParams::parse(&raw);
    let (reports, count) = db::list_issues(&state.db, &params).await?;

    Ok(Json(json!({
        "success": true,
        "reports": reports,
        "count": count,
    })))
}

/// GET /api/v1/issue/my-reports
pub async fn my_reports(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Value>, ApiError> {
    check(&user, &[Gate::Verified])?;

    let reports = db::issues_reported_by(&state.db, &user.id).await?;
    Ok(Json(json!({
        "success": true,
        "count": reports.len(),
        "reports": reports,
    })))
}

/// GET /api/v1/issue/user/stats
pub async fn user_stats(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Value>, ApiError> {
    check(&user, &[Gate::Verified])?;

    let stats = db::user_report_stats(&state.db, &user.id).await?;
    Ok(Json(json!({
        "success": true,
        "stats": stats,
    })))
}

/// Text fields collected from the submission form
#[derive(Default)]
struct ReportForm {
    title: Option<String>,
    description: Option<String>,
    location: Option<String>,
    pincode: Option<String>,
    category: Option<String>,
    severity: Option<String>,
    mobile: Option<String>,
}

/// POST /api/v1/issue/new (multipart, up to 5 images)
pub async fn new_issue(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    check(&user, &[Gate::Verified])?;

    let mut form = ReportForm::default();
    let mut images: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::bad_request("Malformed multipart request"))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("images") => {
                if images.len() >= MAX_IMAGES {
                    return Err(ApiError::bad_request("At most 5 images are allowed"));
                }
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::bad_request("Images must be files"))?;
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::bad_request("Invalid image upload"))?;
                images.push((file_name, data.to_vec()));
            }
            Some(key) => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| ApiError::bad_request("Invalid form field"))?;
                let value = value.trim().to_string();
                match key {
                    "title" => form.title = Some(value),
                    "description" => form.description = Some(value),
                    "location" => form.location = Some(value),
                    "pincode" => form.pincode = Some(value),
                    "category" => form.category = Some(value),
                    "severity" => form.severity = Some(value),
                    "mobile" => form.mobile = Some(value),
                    other => warn!(field = other, "Ignoring unknown report field"),
                }
            }
            None => continue,
        }
    }

    let mut errors = ValidationErrorBuilder::new();
    let title = form.title.unwrap_or_default();
    let description = form.description.unwrap_or_default();
    let location = form.location.unwrap_or_default();
    let pincode = form.pincode.unwrap_or_default();
    let category = form.category.unwrap_or_default();
    let mobile = form.mobile.unwrap_or_default();

    if let Err(e) = validation::validate_title(&title) {
        errors.add("title", e);
    }
    if let Err(e) = validation::validate_description(&description) {
        errors.add("description", e);
    }
    if let Err(e) = validation::validate_location(&location) {
        errors.add("location", e);
    }
    if let Err(e) = validation::validate_pincode(&pincode) {
        errors.add("pincode", e);
    }
    if let Err(e) = validation::validate_category(&category) {
        errors.add("category", e);
    }
    if let Err(e) = validation::validate_mobile(&mobile) {
        errors.add("mobile", e);
    }
    let severity = match form.severity.as_deref().map(str::parse::<i64>) {
        Some(Ok(v)) => {
            if let Err(e) = validation::validate_severity(v) {
                errors.add("severity", e);
            }
            v
        }
        _ => {
            errors.add("severity", "Severity must be a number between 1 and 5");
            0
        }
    };
    errors.finish()?;

    // Only persist files once the submission itself is valid
    let mut stored = Vec::with_capacity(images.len());
    for (file_name, data) in &images {
        match uploads::save_image(&state.config.server.uploads_dir, file_name, data).await {
            Ok(path) => stored.push(path),
            Err(e) => {
                uploads::remove_images(&state.config.server.uploads_dir, &stored).await;
                return Err(e);
            }
        }
    }

    let report = NewReport {
        title,
        description,
        location,
        pincode,
        category,
        severity,
        reporter_name: user.name.clone(),
        reporter_mobile: mobile,
        images: stored.clone(),
    };

    match db::submit_report(&state.db, &user.id, &report).await {
        Ok(ReportOutcome::Created(issue)) => {
            info!(issue = %issue.id, user = %user.id, "Issue created");
            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "success": true,
                    "message": "Issue reported successfully",
                    "report": issue,
                })),
            ))
        }
        Ok(ReportOutcome::Merged(issue)) => {
            info!(issue = %issue.id, user = %user.id, "Report merged into existing issue");
            Ok((
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "This issue was already reported; your report has been added to it",
                    "report": issue,
                })),
            ))
        }
        Err(e) => {
            // The rejected submission's files must not linger on disk
            uploads::remove_images(&state.config.server.uploads_dir, &stored).await;
            Err(e.into())
        }
    }
}

/// DELETE /api/v1/issue/:id
pub async fn delete_issue(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    check(&user, &[Gate::Verified])?;

    let issue = db::find_issue(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Issue not found"))?;

    require_owner(&user, issue.reported_by.as_deref())?;

    let image_paths = db::delete_issue(&state.db, &id).await?;
    uploads::remove_images(&state.config.server.uploads_dir, &image_paths).await;

    info!(issue = %id, user = %user.id, "Issue deleted");
    Ok(Json(json!({
        "success": true,
        "message": "Issue deleted successfully",
    })))
}

/// GET /api/v1/issue/admin
///
/// Same search/filter/pagination as the user listing, admin-gated.
pub async fn admin_list_issues(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    check(&user, &[Gate::Role(&["admin"]), Gate::Verified])?;

    let params = ListParams::parse(&raw);
    let (reports, count) = db::list_issues(&state.db, &params).await?;

    Ok(Json(json!({
        "success": true,
        "reports": reports,
        "count": count,
    })))
}

/// GET /api/v1/issue/admin/:id
pub async fn admin_get_issue(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    check(&user, &[Gate::Role(&["admin"]), Gate::Verified])?;

    let report = db::get_issue_detail(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Issue not found"))?;

    Ok(Json(json!({
        "success": true,
        "report": report,
    })))
}

/// PUT /api/v1/issue/admin/:id
pub async fn admin_update_issue(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(update): Json<UpdateIssue>,
) -> Result<Json<Value>, ApiError> {
    check(&user, &[Gate::Role(&["admin"]), Gate::Verified])?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(title) = &update.title {
        if let Err(e) = validation::validate_title(title) {
            errors.add("title", e);
        }
    }
    if let Some(description) = &update.description {
        if let Err(e) = validation::validate_description(description) {
            errors.add("description", e);
        }
    }
    if let Some(category) = &update.category {
        if let Err(e) = validation::validate_category(category) {
            errors.add("category", e);
        }
    }
    if let Some(status) = &update.status {
        if let Err(e) = validation::validate_status(status) {
            errors.add("status", e);
        }
    }
    if let Some(severity) = update.severity {
        if let Err(e) = validation::validate_severity(severity) {
            errors.add("severity", e);
        }
    }
    errors.finish()?;

    let report = db::update_issue(&state.db, &id, &update)
        .await?
        .ok_or_else(|| ApiError::not_found("Issue not found"))?;

    info!(issue = %id, admin = %user.id, "Issue updated");
    Ok(Json(json!({
        "success": true,
        "message": "Issue updated successfully",
        "report": report,
    })))
}
