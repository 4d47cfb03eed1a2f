//! Issue models, duplicate-report aggregation, and listing queries.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::api::query::{FilterValue, ListParams, PAGE_SIZE};

pub const CATEGORIES: [&str; 5] = ["Road", "Sanitation", "Electricity", "Water", "Other"];
pub const STATUSES: [&str; 3] = ["Pending", "In Progress", "Resolved"];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IssueRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub pincode: String,
    pub category: String,
    pub severity: i64,
    pub status: String,
    pub reported_by: Option<String>,
    pub created_at: String,
}

/// A reporter attached to an issue
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReporterEntry {
    #[serde(rename = "user")]
    pub user_id: String,
    pub reporter_name: String,
    pub reporter_mobile: String,
}

/// A stored image reference attached to an issue
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ImageEntry {
    pub image: String,
}

/// Full issue as returned by the API: row plus its ordered reporters and images
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueDetail {
    pub id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub pincode: String,
    pub category: String,
    pub severity: i64,
    pub status: String,
    pub images: Vec<ImageEntry>,
    pub reporters: Vec<ReporterEntry>,
    pub reported_by: Option<String>,
    pub created_at: String,
}

/// A validated, trimmed report submission
#[derive(Debug, Clone)]
pub struct NewReport {
    pub title: String,
    pub description: String,
    pub location: String,
    pub pincode: String,
    pub category: String,
    pub severity: i64,
    pub reporter_name: String,
    pub reporter_mobile: String,
    /// Stored file paths of the uploaded images, in upload order
    pub images: Vec<String>,
}

/// Result of a report submission
#[derive(Debug)]
pub enum ReportOutcome {
    /// A new issue was created for this identity triple
    Created(IssueDetail),
    /// The report was merged into an existing issue
    Merged(IssueDetail),
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("You have already reported this issue")]
    AlreadyReported,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Per-user report counters
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub reports_submitted: i64,
    pub reports_pending: i64,
    pub reports_resolved: i64,
}

async fn load_reporters(
    pool: &SqlitePool,
    issue_id: &str,
) -> Result<Vec<ReporterEntry>, sqlx::Error> {
    sqlx::query_as(
        "SELECT user_id, reporter_name, reporter_mobile FROM issue_reporters WHERE issue_id = ? ORDER BY id ASC",
    )
    .bind(issue_id)
    .fetch_all(pool)
    .await
}

async fn load_images(pool: &SqlitePool, issue_id: &str) -> Result<Vec<ImageEntry>, sqlx::Error> {
    sqlx::query_as("SELECT image FROM issue_images WHERE issue_id = ? ORDER BY id ASC")
        .bind(issue_id)
        .fetch_all(pool)
        .await
}

/// Assemble the full API view of an issue row
pub async fn load_detail(pool: &SqlitePool, row: IssueRow) -> Result<IssueDetail, sqlx::Error> {
    let reporters = load_reporters(pool, &row.id).await?;
    let images = load_images(pool, &row.id).await?;
    Ok(IssueDetail {
        id: row.id,
        title: row.title,
        description: row.description,
        location: row.location,
        pincode: row.pincode,
        category: row.category,
        severity: row.severity,
        status: row.status,
        images,
        reporters,
        reported_by: row.reported_by,
        created_at: row.created_at,
    })
}

pub async fn find_issue(pool: &SqlitePool, id: &str) -> Result<Option<IssueRow>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM issues WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn get_issue_detail(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<IssueDetail>, sqlx::Error> {
    match find_issue(pool, id).await? {
        Some(row) => Ok(Some(load_detail(pool, row).await?)),
        None => Ok(None),
    }
}

fn is_identity_conflict(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.message().contains("UNIQUE constraint failed: issues.")
    )
}

/// Submit a report: create a new issue for an unseen identity triple, or merge
/// the reporter and images into the existing one.
///
/// An account may report a given issue at most once; a repeat submission is
/// rejected without mutation. Two racing first submissions collide on the
/// identity-triple unique index and the loser retries as a merge.
pub async fn submit_report(
    pool: &SqlitePool,
    user_id: &str,
    report: &NewReport,
) -> Result<ReportOutcome, ReportError> {
    let existing: Option<IssueRow> =
        sqlx::query_as("SELECT * FROM issues WHERE title = ? AND location = ? AND description = ?")
            .bind(&report.title)
            .bind(&report.location)
            .bind(&report.description)
            .fetch_optional(pool)
            .await?;

    if let Some(issue) = existing {
        return merge_report(pool, &issue.id, user_id, report).await;
    }

    match create_issue(pool, user_id, report).await {
        Ok(detail) => Ok(ReportOutcome::Created(detail)),
        Err(ReportError::Db(ref err)) if is_identity_conflict(err) => {
            // Lost the race for first submission; someone else created the
            // issue between our lookup and insert. Merge into theirs.
            let issue: IssueRow = sqlx::query_as(
                "SELECT * FROM issues WHERE title = ? AND location = ? AND description = ?",
            )
            .bind(&report.title)
            .bind(&report.location)
            .bind(&report.description)
            .fetch_one(pool)
            .await?;
            merge_report(pool, &issue.id, user_id, report).await
        }
        Err(err) => Err(err),
    }
}

async fn create_issue(
    pool: &SqlitePool,
    user_id: &str,
    report: &NewReport,
) -> Result<IssueDetail, ReportError> {
    let mut tx = pool.begin().await?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO issues (id, title, description, location, pincode, category, severity, status, reported_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'Pending', ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&report.title)
    .bind(&report.description)
    .bind(&report.location)
    .bind(&report.pincode)
    .bind(&report.category)
    .bind(report.severity)
    .bind(user_id)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO issue_reporters (issue_id, user_id, reporter_name, reporter_mobile, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(user_id)
    .bind(&report.reporter_name)
    .bind(&report.reporter_mobile)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    for image in &report.images {
        sqlx::query("INSERT INTO issue_images (issue_id, image, created_at) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(image)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    let row = find_issue(pool, &id).await?.ok_or(sqlx::Error::RowNotFound)?;
    Ok(load_detail(pool, row).await?)
}

/// Append the submitter and their images to an existing issue.
/// `reported_by` and `status` are left untouched.
async fn merge_report(
    pool: &SqlitePool,
    issue_id: &str,
    user_id: &str,
    report: &NewReport,
) -> Result<ReportOutcome, ReportError> {
    let mut tx = pool.begin().await?;

    let already: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM issue_reporters WHERE issue_id = ? AND user_id = ?")
            .bind(issue_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
    if already.is_some() {
        return Err(ReportError::AlreadyReported);
    }

    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO issue_reporters (issue_id, user_id, reporter_name, reporter_mobile, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(issue_id)
    .bind(user_id)
    .bind(&report.reporter_name)
    .bind(&report.reporter_mobile)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    for image in &report.images {
        sqlx::query("INSERT INTO issue_images (issue_id, image, created_at) VALUES (?, ?, ?)")
            .bind(issue_id)
            .bind(image)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    let row = find_issue(pool, issue_id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    Ok(ReportOutcome::Merged(load_detail(pool, row).await?))
}

/// List issues matching the parsed search/filter parameters.
///
/// Returns one page of results plus the total count of matches computed with
/// the same predicate, before LIMIT/OFFSET.
pub async fn list_issues(
    pool: &SqlitePool,
    params: &ListParams,
) -> Result<(Vec<IssueDetail>, i64), sqlx::Error> {
    let (where_clause, binds) = params.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM issues {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for bind in &binds {
        count_query = match bind {
            FilterValue::Int(v) => count_query.bind(*v),
            FilterValue::Float(v) => count_query.bind(*v),
            FilterValue::Text(v) => count_query.bind(v.as_str()),
        };
    }
    let total = count_query.fetch_one(pool).await?;

    // Newest first; id tiebreak keeps page boundaries stable
    let sql = format!(
        "SELECT * FROM issues {} ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
        where_clause
    );
    let mut query = sqlx::query_as::<_, IssueRow>(&sql);
    for bind in &binds {
        query = match bind {
            FilterValue::Int(v) => query.bind(*v),
            FilterValue::Float(v) => query.bind(*v),
            FilterValue::Text(v) => query.bind(v.as_str()),
        };
    }
    query = query.bind(PAGE_SIZE).bind(params.offset());
    let rows = query.fetch_all(pool).await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(load_detail(pool, row).await?);
    }

    Ok((items, total))
}

/// Issues the given account has reported (as any reporter, not just owner)
pub async fn issues_reported_by(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<IssueDetail>, sqlx::Error> {
    let rows: Vec<IssueRow> = sqlx::query_as(
        r#"
        SELECT i.* FROM issues i
        INNER JOIN issue_reporters r ON r.issue_id = i.id
        WHERE r.user_id = ?
        ORDER BY i.created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(load_detail(pool, row).await?);
    }
    Ok(items)
}

pub async fn user_report_stats(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<UserStats, sqlx::Error> {
    let count_with_status = |status: Option<&'static str>| {
        let mut sql = String::from(
            "SELECT COUNT(*) FROM issues i INNER JOIN issue_reporters r ON r.issue_id = i.id WHERE r.user_id = ?",
        );
        if status.is_some() {
            sql.push_str(" AND i.status = ?");
        }
        sql
    };

    let submitted: i64 = sqlx::query_scalar(&count_with_status(None))
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    let pending: i64 = sqlx::query_scalar(&count_with_status(Some("Pending")))
        .bind(user_id)
        .bind("Pending")
        .fetch_one(pool)
        .await?;
    let resolved: i64 = sqlx::query_scalar(&count_with_status(Some("Resolved")))
        .bind(user_id)
        .bind("Resolved")
        .fetch_one(pool)
        .await?;

    Ok(UserStats {
        reports_submitted: submitted,
        reports_pending: pending,
        reports_resolved: resolved,
    })
}

/// Delete an issue. Reporter and image rows cascade; the stored image paths
/// are returned so the caller can remove the files from disk.
pub async fn delete_issue(pool: &SqlitePool, id: &str) -> Result<Vec<String>, sqlx::Error> {
    let images = load_images(pool, id).await?;

    sqlx::query("DELETE FROM issues WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(images.into_iter().map(|i| i.image).collect())
}

/// Fields an administrator may change on an issue
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIssue {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub pincode: Option<String>,
    pub category: Option<String>,
    pub severity: Option<i64>,
    pub status: Option<String>,
}

pub async fn update_issue(
    pool: &SqlitePool,
    id: &str,
    update: &UpdateIssue,
) -> Result<Option<IssueDetail>, sqlx::Error> {
    let mut sets = Vec::new();
    let mut text_binds: Vec<&str> = Vec::new();

    if let Some(v) = &update.title {
        sets.push("title = ?");
        text_binds.push(v);
    }
    if let Some(v) = &update.description {
        sets.push("description = ?");
        text_binds.push(v);
    }
    if let Some(v) = &update.location {
        sets.push("location = ?");
        text_binds.push(v);
    }
    if let Some(v) = &update.pincode {
        sets.push("pincode = ?");
        text_binds.push(v);
    }
    if let Some(v) = &update.category {
        sets.push("category = ?");
        text_binds.push(v);
    }
    if let Some(v) = &update.status {
        sets.push("status = ?");
        text_binds.push(v);
    }
    if update.severity.is_some() {
        sets.push("severity = ?");
    }

    if !sets.is_empty() {
        let sql = format!("UPDATE issues SET {} WHERE id = ?", sets.join(", "));
        let mut query = sqlx::query(&sql);
        for bind in &text_binds {
            query = query.bind(*bind);
        }
        if let Some(severity) = update.severity {
            query = query.bind(severity);
        }
        query = query.bind(id);
        query.execute(pool).await?;
    }

    get_issue_detail(pool, id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use std::collections::HashMap;

    async fn seed_user(pool: &SqlitePool, id: &str) {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, is_verified, role, created_at, updated_at) VALUES (?, ?, ?, 'h', 1, 'user', ?, ?)",
        )
        .bind(id)
        .bind(format!("User {}", id))
        .bind(format!("{}@example.com", id))
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
    }

    fn pothole_report(images: Vec<String>) -> NewReport {
        NewReport {
            title: "Pothole on MG Road".to_string(),
            description: "Deep pothole near the bus stop".to_string(),
            location: "MG Road, Sector 4".to_string(),
            pincode: "560001".to_string(),
            category: "Road".to_string(),
            severity: 4,
            reporter_name: "Asha".to_string(),
            reporter_mobile: "9800000001".to_string(),
            images,
        }
    }

    #[tokio::test]
    async fn test_first_submission_creates_issue_with_one_reporter() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;

        let outcome = submit_report(&pool, "u1", &pothole_report(vec!["a.jpg".into()]))
            .await
            .unwrap();

        let ReportOutcome::Created(issue) = outcome else {
            panic!("expected Created");
        };
        assert_eq!(issue.reporters.len(), 1);
        assert_eq!(issue.reporters[0].user_id, "u1");
        assert_eq!(issue.reported_by.as_deref(), Some("u1"));
        assert_eq!(issue.status, "Pending");
        assert_eq!(issue.images.len(), 1);
    }

    #[tokio::test]
    async fn test_second_reporter_merges_without_new_issue() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;
        seed_user(&pool, "u2").await;

        submit_report(&pool, "u1", &pothole_report(vec!["a.jpg".into()]))
            .await
            .unwrap();
        let outcome = submit_report(&pool, "u2", &pothole_report(vec!["b.jpg".into()]))
            .await
            .unwrap();

        let ReportOutcome::Merged(issue) = outcome else {
            panic!("expected Merged");
        };
        assert_eq!(issue.reporters.len(), 2);
        // Insertion order preserved
        assert_eq!(issue.reporters[0].user_id, "u1");
        assert_eq!(issue.reporters[1].user_id, "u2");
        assert_eq!(issue.images.len(), 2);
        assert_eq!(issue.images[0].image, "a.jpg");
        assert_eq!(issue.images[1].image, "b.jpg");
        // Primary ownership is untouched by a merge
        assert_eq!(issue.reported_by.as_deref(), Some("u1"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM issues")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_repeat_submission_by_same_account_is_rejected_unchanged() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;

        submit_report(&pool, "u1", &pothole_report(vec!["a.jpg".into()]))
            .await
            .unwrap();
        let err = submit_report(&pool, "u1", &pothole_report(vec!["c.jpg".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::AlreadyReported));

        let images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM issue_images")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(images, 1);
    }

    #[tokio::test]
    async fn test_distinct_identity_triple_creates_separate_issue() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;

        submit_report(&pool, "u1", &pothole_report(vec![])).await.unwrap();
        let mut other = pothole_report(vec![]);
        other.location = "Station Road".to_string();
        let outcome = submit_report(&pool, "u1", &other).await.unwrap();
        assert!(matches!(outcome, ReportOutcome::Created(_)));
    }

    #[tokio::test]
    async fn test_round_trip_preserves_fields() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;

        let report = pothole_report(vec!["a.jpg".into(), "b.jpg".into()]);
        let ReportOutcome::Created(created) = submit_report(&pool, "u1", &report).await.unwrap()
        else {
            panic!("expected Created");
        };

        let fetched = get_issue_detail(&pool, &created.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, report.title);
        assert_eq!(fetched.description, report.description);
        assert_eq!(fetched.location, report.location);
        assert_eq!(fetched.pincode, report.pincode);
        assert_eq!(fetched.category, report.category);
        assert_eq!(fetched.severity, report.severity);
        assert_eq!(fetched.images.len(), 2);
        assert_eq!(fetched.images[0].image, "a.jpg");
        assert_eq!(fetched.reporters[0].reporter_name, "Asha");
    }

    #[tokio::test]
    async fn test_list_issues_paginates_with_full_count() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;

        // Seven matching issues, severity 3..=5, and one that matches neither
        // the keyword nor the severity floor.
        for i in 0..7 {
            let mut report = pothole_report(vec![]);
            report.title = format!("Pothole cluster {}", i);
            report.severity = 3 + (i % 3);
            submit_report(&pool, "u1", &report).await.unwrap();
        }
        let mut quiet = pothole_report(vec![]);
        quiet.title = "Streetlight out".to_string();
        quiet.description = "Lamp dead on corner".to_string();
        quiet.severity = 2;
        submit_report(&pool, "u1", &quiet).await.unwrap();

        let mut raw = HashMap::new();
        raw.insert("keyword".to_string(), "pothole".to_string());
        raw.insert("severity[gte]".to_string(), "3".to_string());
        raw.insert("page".to_string(), "2".to_string());
        let params = ListParams::parse(&raw);

        let (items, total) = list_issues(&pool, &params).await.unwrap();
        assert_eq!(total, 7);
        // Page 2 of a 7-item set at page size 4 holds items 5..7
        assert_eq!(items.len(), 3);
        for item in &items {
            assert!(item.title.to_lowercase().contains("pothole"));
            assert!(item.severity >= 3);
        }
    }

    #[tokio::test]
    async fn test_delete_issue_returns_image_paths() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;

        let ReportOutcome::Created(issue) =
            submit_report(&pool, "u1", &pothole_report(vec!["a.jpg".into(), "b.jpg".into()]))
                .await
                .unwrap()
        else {
            panic!("expected Created");
        };

        let paths = delete_issue(&pool, &issue.id).await.unwrap();
        assert_eq!(paths, vec!["a.jpg".to_string(), "b.jpg".to_string()]);

        assert!(get_issue_detail(&pool, &issue.id).await.unwrap().is_none());
        let reporters: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM issue_reporters")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(reporters, 0);
    }

    #[tokio::test]
    async fn test_update_issue_changes_status_only() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;

        let ReportOutcome::Created(issue) =
            submit_report(&pool, "u1", &pothole_report(vec![])).await.unwrap()
        else {
            panic!("expected Created");
        };

        let update = UpdateIssue {
            status: Some("In Progress".to_string()),
            ..Default::default()
        };
        let updated = update_issue(&pool, &issue.id, &update).await.unwrap().unwrap();
        assert_eq!(updated.status, "In Progress");
        assert_eq!(updated.title, issue.title);
    }

    #[tokio::test]
    async fn test_user_report_stats() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;
        seed_user(&pool, "u2").await;

        for i in 0..3 {
            let mut report = pothole_report(vec![]);
            report.title = format!("Issue {}", i);
            submit_report(&pool, "u1", &report).await.unwrap();
        }
        let mut other = pothole_report(vec![]);
        other.title = "Someone else's".to_string();
        let ReportOutcome::Created(resolved) = submit_report(&pool, "u2", &other).await.unwrap()
        else {
            panic!("expected Created");
        };
        update_issue(
            &pool,
            &resolved.id,
            &UpdateIssue {
                status: Some("Resolved".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let stats = user_report_stats(&pool, "u1").await.unwrap();
        assert_eq!(stats.reports_submitted, 3);
        assert_eq!(stats.reports_pending, 3);
        assert_eq!(stats.reports_resolved, 0);

        let stats = user_report_stats(&pool, "u2").await.unwrap();
        assert_eq!(stats.reports_submitted, 1);
        assert_eq!(stats.reports_resolved, 1);
    }
}
