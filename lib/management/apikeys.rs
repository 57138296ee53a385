//! API key issuance and validation.
//!
//! Keys are `org_` + 32 random bytes, base64url without padding. Only the
//! bcrypt hash (cost 12) is stored. Validation scans the active-key set
//! with bcrypt comparisons, which is intentionally slow, so a TTL cache in
//! front collapses the hot path to a map lookup while still letting a
//! revocation take effect within the TTL.

use std::{
    collections::HashMap,
    sync::RwLock,
    time::{Duration, Instant},
};

use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use sqlx::{Pool, Sqlite};

use crate::{config::Config, utils::generate_id, HyperfleetError, HyperfleetResult};

use super::{ApiKey, GeneratedApiKey};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Prefix identifying organization API keys.
const API_KEY_PREFIX: &str = "org";

/// Random bytes in the key body.
const API_KEY_BYTES: usize = 32;

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 12;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// TTL cache fronting bcrypt verification of presented keys.
#[derive(Debug)]
pub struct KeyValidator {
    pool: Pool<Sqlite>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    key: ApiKey,
    expires_at: Instant,
}

//--------------------------------------------------------------------------------------------------
// Functions: Issuance
//--------------------------------------------------------------------------------------------------

/// Generates a new plaintext key.
pub fn generate_plain_key() -> String {
    let mut bytes = [0u8; API_KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "{}_{}",
        API_KEY_PREFIX,
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    )
}

/// Hashes a plaintext key for storage.
pub fn hash_key(plain_key: &str) -> HyperfleetResult<String> {
    bcrypt::hash(plain_key, BCRYPT_COST).map_err(HyperfleetError::custom)
}

/// Verifies a presented key against a stored hash.
pub fn verify_key(plain_key: &str, hash: &str) -> bool {
    bcrypt::verify(plain_key, hash).unwrap_or(false)
}

/// Mints a new API key for an organization and returns the plaintext
/// exactly once.
pub async fn generate_key(
    pool: &Pool<Sqlite>,
    org_id: &str,
    created_by: &str,
    key_name: &str,
) -> HyperfleetResult<GeneratedApiKey> {
    let plain_key = generate_plain_key();
    let hash = hash_key(&plain_key)?;

    let id = generate_id();
    let created_at = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO api_keys (id, org_id, name, hash, created_by, is_active, created_at)
        VALUES (?, ?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(&id)
    .bind(org_id)
    .bind(key_name)
    .bind(&hash)
    .bind(created_by)
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok(GeneratedApiKey {
        plain_key,
        key_id: id,
        key_name: key_name.to_string(),
        org_id: org_id.to_string(),
        created_at,
        expires_in: "Never (until revoked)".to_string(),
    })
}

/// Lists an organization's keys.
pub async fn list_keys_by_org(pool: &Pool<Sqlite>, org_id: &str) -> HyperfleetResult<Vec<ApiKey>> {
    let rows = sqlx::query_as::<_, ApiKey>(
        "SELECT * FROM api_keys WHERE org_id = ? ORDER BY created_at",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Deletes a key outright.
pub async fn revoke_key(pool: &Pool<Sqlite>, key_id: &str) -> HyperfleetResult<()> {
    sqlx::query("DELETE FROM api_keys WHERE id = ?")
        .bind(key_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Activates or deactivates a key without deleting it.
pub async fn set_key_active(
    pool: &Pool<Sqlite>,
    key_id: &str,
    is_active: bool,
) -> HyperfleetResult<()> {
    sqlx::query("UPDATE api_keys SET is_active = ? WHERE id = ?")
        .bind(is_active)
        .bind(key_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Stamps a key's last-used time.
pub async fn touch_key(pool: &Pool<Sqlite>, key_id: &str) -> HyperfleetResult<()> {
    sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(key_id)
        .execute(pool)
        .await?;
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl KeyValidator {
    /// Creates a validator with the configured cache TTL.
    pub fn new(cfg: &Config, pool: Pool<Sqlite>) -> Self {
        let ttl_secs = (*cfg.get_api_key_cache_ttl_secs()).max(1);
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Validates a presented plaintext key, returning the matching record.
    ///
    /// Cache hits update `last_used_at` off the request path. Mismatches
    /// are never cached.
    pub async fn validate(&self, plain_key: &str) -> HyperfleetResult<ApiKey> {
        if let Some(entry) = self.cache_lookup(plain_key) {
            self.touch_async(entry.id.clone());
            return Ok(entry);
        }

        let keys = sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE is_active = 1")
            .fetch_all(&self.pool)
            .await?;

        for key in keys {
            if verify_key(plain_key, &key.hash) {
                self.touch_async(key.id.clone());
                self.cache_insert(plain_key, key.clone());
                return Ok(key);
            }
        }

        Err(HyperfleetError::InvalidInput("invalid api key".to_string()))
    }

    fn cache_lookup(&self, plain_key: &str) -> Option<ApiKey> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache
            .get(plain_key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.key.clone())
    }

    fn cache_insert(&self, plain_key: &str, key: ApiKey) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            plain_key.to_string(),
            CacheEntry {
                key,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    fn touch_async(&self, key_id: String) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(e) = touch_key(&pool, &key_id).await {
                tracing::debug!(key = %key_id, error = %e, "last-used update failed");
            }
        });
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::management::db::tests::test_pool;

    fn test_config() -> Config {
        let _guard = crate::testing::env_lock();
        std::env::remove_var("API_KEY_CACHE_TTL_SECONDS");
        Config::from_env()
    }

    #[test]
    fn test_plain_key_shape() {
        let key = generate_plain_key();
        assert!(key.starts_with("org_"));
        // 32 bytes base64url unpadded is 43 chars.
        assert_eq!(key.len(), "org_".len() + 43);
        assert_ne!(key, generate_plain_key());
    }

    #[test]
    fn test_hash_verify_roundtrip() {
        let key = generate_plain_key();
        let hash = hash_key(&key).unwrap();
        assert!(verify_key(&key, &hash));
        assert!(!verify_key("org_wrong", &hash));
    }

    #[tokio::test]
    async fn test_validator_accepts_issued_key() {
        let cfg = test_config();
        let (_dir, pool) = test_pool().await;
        let issued = generate_key(&pool, "org-a", "user-a", "default").await.unwrap();

        let validator = KeyValidator::new(&cfg, pool);
        let key = validator.validate(&issued.plain_key).await.unwrap();
        assert_eq!(key.org_id, "org-a");

        // Second validation rides the cache.
        let key = validator.validate(&issued.plain_key).await.unwrap();
        assert_eq!(key.id, issued.key_id);
    }

    #[tokio::test]
    async fn test_validator_rejects_unknown_and_inactive_keys() {
        let cfg = test_config();
        let (_dir, pool) = test_pool().await;
        let issued = generate_key(&pool, "org-a", "user-a", "default").await.unwrap();
        set_key_active(&pool, &issued.key_id, false).await.unwrap();

        let validator = KeyValidator::new(&cfg, pool);
        assert!(validator.validate("org_definitely-not-real").await.is_err());
        // Deactivated before ever being cached: fails validation.
        assert!(validator.validate(&issued.plain_key).await.is_err());
    }
}
