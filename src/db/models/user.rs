//! Account and pending-registration models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub is_verified: bool,
    pub role: String,
    pub avatar: Option<String>,
    pub reset_token_hash: Option<String>,
    pub reset_token_expires: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Public view of an account, returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub is_verified: bool,
    pub role: String,
    pub avatar: Option<String>,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            is_verified: user.is_verified,
            role: user.role,
            avatar: user.avatar,
            created_at: user.created_at,
        }
    }
}

/// Signup awaiting email verification. Converted into a `User` on consumption.
#[derive(Debug, Clone, FromRow)]
pub struct PendingRegistration {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub token_hash: String,
    pub expires_at: String,
    pub created_at: String,
}

pub async fn find_user_by_email(
    pool: &SqlitePool,
    email: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await
}

pub async fn find_user_by_id(pool: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Stage a registration for verification.
///
/// Any prior pending registration for the same email is deleted in the same
/// transaction, so at most one unconsumed record exists per email.
pub async fn stage_pending_registration(
    pool: &SqlitePool,
    name: &str,
    email: &str,
    password_hash: &str,
    token_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM pending_registrations WHERE email = ?")
        .bind(email)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO pending_registrations (id, name, email, password_hash, token_hash, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(token_hash)
    .bind(expires_at.to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

/// Roll back a staged registration, e.g. when the verification email could not
/// be delivered.
pub async fn discard_pending_registration(
    pool: &SqlitePool,
    email: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM pending_registrations WHERE email = ?")
        .bind(email)
        .execute(pool)
        .await?;
    Ok(())
}

/// Consume a pending registration matching the hashed token and email.
///
/// On a match the pending record is deleted and the account is created (or an
/// existing unverified account is marked verified), all in one transaction, so
/// replaying the same token finds nothing. Returns `None` when no unexpired
/// match exists.
pub async fn consume_pending_registration(
    pool: &SqlitePool,
    email: &str,
    token_hash: &str,
) -> Result<Option<User>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let now = Utc::now().to_rfc3339();

    let pending: Option<PendingRegistration> = sqlx::query_as(
        "SELECT * FROM pending_registrations WHERE email = ? AND token_hash = ? AND expires_at > ?",
    )
    .bind(email)
    .bind(token_hash)
    .bind(&now)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(pending) = pending else {
        return Ok(None);
    };

    let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(&mut *tx)
        .await?;

    let user_id = match existing {
        Some(user) => {
            sqlx::query("UPDATE users SET is_verified = 1, updated_at = ? WHERE id = ?")
                .bind(&now)
                .bind(&user.id)
                .execute(&mut *tx)
                .await?;
            user.id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO users (id, name, email, password_hash, is_verified, role, created_at, updated_at)
                VALUES (?, ?, ?, ?, 1, 'user', ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&pending.name)
            .bind(&pending.email)
            .bind(&pending.password_hash)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            id
        }
    };

    sqlx::query("DELETE FROM pending_registrations WHERE id = ?")
        .bind(&pending.id)
        .execute(&mut *tx)
        .await?;

    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&user_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Some(user))
}

/// Store a hashed reset token on the account. Overwrites any previous token,
/// which invalidates it.
pub async fn set_reset_token(
    pool: &SqlitePool,
    user_id: &str,
    token_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE users SET reset_token_hash = ?, reset_token_expires = ?, updated_at = ? WHERE id = ?",
    )
    .bind(token_hash)
    .bind(expires_at.to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn clear_reset_token(pool: &SqlitePool, user_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE users SET reset_token_hash = NULL, reset_token_expires = NULL, updated_at = ? WHERE id = ?",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Find the account holding an unexpired reset token
pub async fn find_user_by_reset_token(
    pool: &SqlitePool,
    token_hash: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM users WHERE reset_token_hash = ? AND reset_token_expires > ?")
        .bind(token_hash)
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(pool)
        .await
}

/// Update the password hash and drop any outstanding reset token
pub async fn update_password(
    pool: &SqlitePool,
    user_id: &str,
    password_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE users
        SET password_hash = ?, reset_token_hash = NULL, reset_token_expires = NULL, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(password_hash)
    .bind(Utc::now().to_rfc3339())
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Update the fields a profile owner may change on their own account.
/// `None` leaves a field untouched.
pub async fn update_profile(
    pool: &SqlitePool,
    user_id: &str,
    name: Option<&str>,
    email: Option<&str>,
    avatar: Option<&str>,
) -> Result<Option<User>, sqlx::Error> {
    if name.is_some() || email.is_some() || avatar.is_some() {
        let mut sets = Vec::new();
        let mut binds: Vec<&str> = Vec::new();
        if let Some(name) = name {
            sets.push("name = ?");
            binds.push(name);
        }
        if let Some(email) = email {
            sets.push("email = ?");
            binds.push(email);
        }
        if let Some(avatar) = avatar {
            sets.push("avatar = ?");
            binds.push(avatar);
        }
        sets.push("updated_at = ?");

        let sql = format!("UPDATE users SET {} WHERE id = ?", sets.join(", "));
        let now = Utc::now().to_rfc3339();
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(*bind);
        }
        query.bind(&now).bind(user_id).execute(pool).await?;
    }

    find_user_by_id(pool, user_id).await
}

pub async fn list_users(pool: &SqlitePool) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM users ORDER BY created_at DESC")
        .fetch_all(pool)
        .await
}

/// Fields an administrator may change on any account
#[derive(Debug, Default, serde::Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
}

pub async fn update_user(
    pool: &SqlitePool,
    id: &str,
    update: &UpdateUser,
) -> Result<Option<User>, sqlx::Error> {
    let mut sets = Vec::new();
    let mut binds: Vec<&str> = Vec::new();
    if let Some(v) = &update.name {
        sets.push("name = ?");
        binds.push(v);
    }
    if let Some(v) = &update.email {
        sets.push("email = ?");
        binds.push(v);
    }
    if let Some(v) = &update.role {
        sets.push("role = ?");
        binds.push(v);
    }

    if !sets.is_empty() {
        sets.push("updated_at = ?");
        let sql = format!("UPDATE users SET {} WHERE id = ?", sets.join(", "));
        let now = Utc::now().to_rfc3339();
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(*bind);
        }
        query.bind(&now).bind(id).execute(pool).await?;
    }

    find_user_by_id(pool, id).await
}

/// Delete an account. Reporter rows cascade and the account's issues survive
/// with `reported_by` nulled. Returns false when no such account exists.
pub async fn delete_user(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::db::test_pool;
    use chrono::Duration;

    async fn pending_count(pool: &SqlitePool, email: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM pending_registrations WHERE email = ?")
            .bind(email)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reregistration_supersedes_pending() {
        let pool = test_pool().await;

        stage_pending_registration(&pool, "Asha", "a@x.com", "h1", "t1", crypto::verification_expiry())
            .await
            .unwrap();
        stage_pending_registration(&pool, "Asha", "a@x.com", "h2", "t2", crypto::verification_expiry())
            .await
            .unwrap();

        assert_eq!(pending_count(&pool, "a@x.com").await, 1);

        // Only the latest token is consumable
        assert!(consume_pending_registration(&pool, "a@x.com", "t1")
            .await
            .unwrap()
            .is_none());
        assert!(consume_pending_registration(&pool, "a@x.com", "t2")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_consume_creates_verified_account_and_blocks_replay() {
        let pool = test_pool().await;

        stage_pending_registration(&pool, "Ravi", "r@x.com", "hash", "tok", crypto::verification_expiry())
            .await
            .unwrap();

        let user = consume_pending_registration(&pool, "r@x.com", "tok")
            .await
            .unwrap()
            .expect("should consume");
        assert!(user.is_verified);
        assert_eq!(user.role, "user");
        assert_eq!(user.password_hash, "hash");
        assert_eq!(pending_count(&pool, "r@x.com").await, 0);

        // Token hashes are single-use
        assert!(consume_pending_registration(&pool, "r@x.com", "tok")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_expired_pending_is_not_consumable() {
        let pool = test_pool().await;

        stage_pending_registration(
            &pool,
            "Meera",
            "m@x.com",
            "hash",
            "tok",
            Utc::now() - Duration::minutes(1),
        )
        .await
        .unwrap();

        assert!(consume_pending_registration(&pool, "m@x.com", "tok")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reset_token_overwrite_invalidates_previous() {
        let pool = test_pool().await;

        stage_pending_registration(&pool, "Asha", "a@x.com", "h", "t", crypto::verification_expiry())
            .await
            .unwrap();
        let user = consume_pending_registration(&pool, "a@x.com", "t")
            .await
            .unwrap()
            .unwrap();

        set_reset_token(&pool, &user.id, "old-hash", crypto::reset_expiry())
            .await
            .unwrap();
        set_reset_token(&pool, &user.id, "new-hash", crypto::reset_expiry())
            .await
            .unwrap();

        assert!(find_user_by_reset_token(&pool, "old-hash")
            .await
            .unwrap()
            .is_none());
        assert!(find_user_by_reset_token(&pool, "new-hash")
            .await
            .unwrap()
            .is_some());

        update_password(&pool, &user.id, "new-pw-hash").await.unwrap();
        assert!(find_user_by_reset_token(&pool, "new-hash")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_profile_leaves_unset_fields() {
        let pool = test_pool().await;

        stage_pending_registration(&pool, "Asha", "a@x.com", "h", "t", crypto::verification_expiry())
            .await
            .unwrap();
        let user = consume_pending_registration(&pool, "a@x.com", "t")
            .await
            .unwrap()
            .unwrap();

        let updated = update_profile(&pool, &user.id, None, None, Some("/uploads/pic.jpg"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Asha");
        assert_eq!(updated.email, "a@x.com");
        assert_eq!(updated.avatar.as_deref(), Some("/uploads/pic.jpg"));

        let updated = update_profile(&pool, &user.id, None, Some("new@x.com"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.email, "new@x.com");
        assert_eq!(updated.avatar.as_deref(), Some("/uploads/pic.jpg"));
    }

    #[tokio::test]
    async fn test_update_profile_rejects_taken_email() {
        let pool = test_pool().await;

        for (name, email, tok) in [("Asha", "a@x.com", "t1"), ("Ravi", "r@x.com", "t2")] {
            stage_pending_registration(&pool, name, email, "h", tok, crypto::verification_expiry())
                .await
                .unwrap();
            consume_pending_registration(&pool, email, tok).await.unwrap();
        }
        let ravi = find_user_by_email(&pool, "r@x.com").await.unwrap().unwrap();

        let err = update_profile(&pool, &ravi.id, None, Some("a@x.com"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, sqlx::Error::Database(_)));
    }

    #[tokio::test]
    async fn test_delete_user_nulls_issue_attribution() {
        use crate::db::models::issue::{get_issue_detail, submit_report, NewReport, ReportOutcome};

        let pool = test_pool().await;
        stage_pending_registration(&pool, "Asha", "a@x.com", "h", "t", crypto::verification_expiry())
            .await
            .unwrap();
        let user = consume_pending_registration(&pool, "a@x.com", "t")
            .await
            .unwrap()
            .unwrap();

        let report = NewReport {
            title: "Broken drain".to_string(),
            description: "Overflowing after rain".to_string(),
            location: "Canal Street".to_string(),
            pincode: "560002".to_string(),
            category: "Sanitation".to_string(),
            severity: 3,
            reporter_name: "Asha".to_string(),
            reporter_mobile: "9800000001".to_string(),
            images: vec![],
        };
        let ReportOutcome::Created(issue) = submit_report(&pool, &user.id, &report).await.unwrap()
        else {
            panic!("expected Created");
        };

        assert!(delete_user(&pool, &user.id).await.unwrap());
        assert!(!delete_user(&pool, &user.id).await.unwrap());

        // The issue survives with attribution cleared and its reporter row gone
        let detail = get_issue_detail(&pool, &issue.id).await.unwrap().unwrap();
        assert!(detail.reported_by.is_none());
        assert!(detail.reporters.is_empty());
    }
}
