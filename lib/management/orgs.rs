//! Organization and user provisioning.
//!
//! Registration is a one-shot flow: create the user, create their default
//! organization, and mint the org's first API key.

use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::{utils::generate_id, HyperfleetError, HyperfleetResult};

use super::{apikeys, GeneratedApiKey, Org, User};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Provisions a user, their default organization, and a first API key.
pub async fn register(
    pool: &Pool<Sqlite>,
    email: &str,
    name: &str,
) -> HyperfleetResult<(User, Org, GeneratedApiKey)> {
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Err(HyperfleetError::Conflict(format!(
            "email {} is already registered",
            email
        )));
    }

    let now = Utc::now();
    let user_id = generate_id();
    let org_id = generate_id();

    let org = Org {
        id: org_id.clone(),
        name: format!("{} Org", name),
        owner_id: user_id.clone(),
        plan: "free".to_string(),
        created_at: now,
    };
    sqlx::query("INSERT INTO orgs (id, name, owner_id, plan, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(&org.id)
        .bind(&org.name)
        .bind(&org.owner_id)
        .bind(&org.plan)
        .bind(org.created_at)
        .execute(pool)
        .await?;

    let user = User {
        id: user_id.clone(),
        name: name.to_string(),
        email: email.to_string(),
        org_id: org_id.clone(),
        role: "user".to_string(),
        created_at: now,
    };
    sqlx::query(
        "INSERT INTO users (id, name, email, org_id, role, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.org_id)
    .bind(&user.role)
    .bind(user.created_at)
    .execute(pool)
    .await?;

    let key = apikeys::generate_key(pool, &org_id, &user_id, "default").await?;

    tracing::info!(user = %user.id, org = %org.id, "provisioned user and default org");
    Ok((user, org, key))
}

/// Fetches an organization by id.
pub async fn get_org(pool: &Pool<Sqlite>, org_id: &str) -> HyperfleetResult<Org> {
    sqlx::query_as::<_, Org>("SELECT * FROM orgs WHERE id = ?")
        .bind(org_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| HyperfleetError::NotFound(format!("org {}", org_id)))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::management::db::tests::test_pool;

    #[tokio::test]
    async fn test_register_provisions_user_org_and_key() {
        let (_dir, pool) = test_pool().await;
        let (user, org, key) = register(&pool, "ada@example.com", "ada").await.unwrap();

        assert_eq!(user.email, "ada@example.com");
        assert_eq!(org.owner_id, user.id);
        assert_eq!(user.org_id, org.id);
        assert_eq!(key.org_id, org.id);
        assert!(key.plain_key.starts_with("org_"));

        let fetched = get_org(&pool, &org.id).await.unwrap();
        assert_eq!(fetched.name, "ada Org");
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_email() {
        let (_dir, pool) = test_pool().await;
        register(&pool, "ada@example.com", "ada").await.unwrap();
        let err = register(&pool, "ada@example.com", "ada2").await.unwrap_err();
        assert!(matches!(err, HyperfleetError::Conflict(_)));
    }
}
