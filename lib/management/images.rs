//! Base image records.
//!
//! Image records name the `<name>-base.qcow2` files overlays are created
//! from. System images are visible to every organization.

use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::{utils::generate_id, HyperfleetError, HyperfleetResult};

use super::Image;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Lists images visible to an organization (its own plus system images).
pub async fn list_images(pool: &Pool<Sqlite>, org_id: &str) -> HyperfleetResult<Vec<Image>> {
    let rows = sqlx::query_as::<_, Image>(
        "SELECT * FROM images WHERE system = 1 OR org_id = ? ORDER BY created_at",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetches an image by id.
pub async fn get_image(pool: &Pool<Sqlite>, image_id: &str) -> HyperfleetResult<Image> {
    sqlx::query_as::<_, Image>("SELECT * FROM images WHERE id = ?")
        .bind(image_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| HyperfleetError::NotFound(format!("image {}", image_id)))
}

/// Fetches the newest image with a given name.
pub async fn get_latest_image_by_name(
    pool: &Pool<Sqlite>,
    name: &str,
) -> HyperfleetResult<Image> {
    sqlx::query_as::<_, Image>(
        "SELECT * FROM images WHERE name = ? ORDER BY created_at DESC LIMIT 1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| HyperfleetError::NotFound(format!("image named {}", name)))
}

/// Persists a new image record.
pub async fn create_image(pool: &Pool<Sqlite>, mut image: Image) -> HyperfleetResult<Image> {
    image.id = generate_id();
    image.created_at = Utc::now();

    sqlx::query(
        "INSERT INTO images (id, name, tag, system, org_id, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&image.id)
    .bind(&image.name)
    .bind(&image.tag)
    .bind(image.system)
    .bind(&image.org_id)
    .bind(image.created_at)
    .execute(pool)
    .await?;

    Ok(image)
}

/// Deletes an image record.
pub async fn delete_image(pool: &Pool<Sqlite>, image_id: &str) -> HyperfleetResult<()> {
    sqlx::query("DELETE FROM images WHERE id = ?")
        .bind(image_id)
        .execute(pool)
        .await?;
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::management::db::tests::test_pool;

    fn image(name: &str, system: bool, org_id: &str) -> Image {
        Image {
            id: String::new(),
            name: name.into(),
            tag: "latest".into(),
            system,
            org_id: org_id.into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_org_visibility() {
        let (_dir, pool) = test_pool().await;
        create_image(&pool, image("debian", true, "")).await.unwrap();
        create_image(&pool, image("custom", false, "org-a")).await.unwrap();
        create_image(&pool, image("secret", false, "org-b")).await.unwrap();

        let names: Vec<String> = list_images(&pool, "org-a")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert!(names.contains(&"debian".to_string()));
        assert!(names.contains(&"custom".to_string()));
        assert!(!names.contains(&"secret".to_string()));
    }

    #[tokio::test]
    async fn test_latest_by_name() {
        let (_dir, pool) = test_pool().await;
        let mut older = image("debian", true, "");
        older.tag = "12".into();
        let older = create_image(&pool, older).await.unwrap();

        let mut newer = image("debian", true, "");
        newer.tag = "13".into();
        newer.created_at = Utc::now() + chrono::Duration::seconds(1);
        // create_image stamps created_at itself; adjust the row after.
        let newer = create_image(&pool, newer).await.unwrap();
        sqlx::query("UPDATE images SET created_at = ? WHERE id = ?")
            .bind(Utc::now() + chrono::Duration::seconds(60))
            .bind(&newer.id)
            .execute(&pool)
            .await
            .unwrap();

        let latest = get_latest_image_by_name(&pool, "debian").await.unwrap();
        assert_eq!(latest.id, newer.id);
        assert_ne!(latest.id, older.id);
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let (_dir, pool) = test_pool().await;
        let created = create_image(&pool, image("debian", true, "")).await.unwrap();
        delete_image(&pool, &created.id).await.unwrap();
        assert!(matches!(
            get_image(&pool, &created.id).await.unwrap_err(),
            HyperfleetError::NotFound(_)
        ));
    }
}
