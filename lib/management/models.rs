use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A sandbox record.
///
/// The id is an opaque 24-hex identifier that doubles as the instance
/// directory name and as the synthetic HTTP host for the agent transport.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sandbox {
    /// Opaque 24-hex identifier.
    pub id: String,

    /// Caller-supplied display name.
    pub name: String,

    /// Base image type the overlay was created from.
    pub image: String,

    /// IPv4 address, unique across non-deleted sandboxes.
    pub ip: String,

    /// vCPU count.
    pub cpus: i64,

    /// RAM in MiB.
    pub memory_mb: i64,

    /// Disk in MiB.
    pub disk_mb: i64,

    /// Owning organization id.
    pub org_id: String,

    /// Environment variables as a JSON object, if any were supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_json: Option<String>,

    /// `running`, `paused` or `stopped`.
    pub status: String,

    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// The boot-time shape of a sandbox, consumed by storage and the lifecycle
/// engine.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// Opaque 24-hex identifier.
    pub id: String,

    /// Base image type.
    pub image: String,

    /// vCPU count.
    pub cpus: u8,

    /// RAM in MiB.
    pub memory_mb: u32,

    /// Disk in MiB.
    pub disk_mb: u32,

    /// IPv4 address.
    pub ip: String,
}

/// An organization record.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Org {
    /// Opaque 24-hex identifier.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Owning user id.
    pub owner_id: String,

    /// Billing plan label.
    pub plan: String,

    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A user record.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Opaque 24-hex identifier.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Unique email.
    pub email: String,

    /// Default organization id.
    pub org_id: String,

    /// `system`, `admin` or `user`.
    pub role: String,

    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A base image record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Opaque 24-hex identifier.
    #[serde(default)]
    pub id: String,

    /// Image name, matches `<name>-base.qcow2` on disk.
    pub name: String,

    /// Image tag.
    #[serde(default)]
    pub tag: String,

    /// System images are visible to every org.
    #[serde(default)]
    pub system: bool,

    /// Owning organization id, empty for system images.
    #[serde(default)]
    pub org_id: String,

    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// An API key record. The hash never leaves the management layer.
#[derive(Debug, Clone, FromRow)]
pub struct ApiKey {
    /// Opaque 24-hex identifier.
    pub id: String,

    /// Owning organization id.
    pub org_id: String,

    /// Display name.
    pub name: String,

    /// bcrypt hash of the plaintext key.
    pub hash: String,

    /// User that created the key, empty for system-issued keys.
    pub created_by: String,

    /// Inactive keys fail validation without a bcrypt check.
    pub is_active: bool,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Last successful validation, if any.
    pub last_used_at: Option<DateTime<Utc>>,
}

/// The hash-free view of an API key returned by the HTTP surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyView {
    /// Opaque 24-hex identifier.
    pub id: String,

    /// Owning organization id.
    pub org_id: String,

    /// Display name.
    pub name: String,

    /// User that created the key.
    pub created_by: String,

    /// Whether the key currently validates.
    pub is_active: bool,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Last successful validation, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// The one-time response carrying a freshly generated plaintext key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedApiKey {
    /// The plaintext key; shown exactly once.
    pub plain_key: String,

    /// The key record id.
    pub key_id: String,

    /// The key display name.
    pub key_name: String,

    /// Owning organization id.
    pub org_id: String,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Expiry policy description.
    pub expires_in: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Sandbox {
    /// Decodes the stored environment variables, if any.
    pub fn env_vars(&self) -> HashMap<String, String> {
        self.env_json
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }
}

impl ApiKey {
    /// Strips the hash for external exposure.
    pub fn to_view(&self) -> ApiKeyView {
        ApiKeyView {
            id: self.id.clone(),
            org_id: self.org_id.clone(),
            name: self.name.clone(),
            created_by: self.created_by.clone(),
            is_active: self.is_active,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
    }
}
