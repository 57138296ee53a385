//! Sandbox provisioning and persistence.
//!
//! The create and restore flows compose the storage, network, VMM and
//! lifecycle layers, persisting a record only once the sandbox is actually
//! up. Partial failures roll back whatever was built (VMM killed, TAP
//! removed, instance directory deleted) before the error propagates.

use std::{collections::HashMap, net::Ipv4Addr, path::Path, time::Duration};

use chrono::Utc;
use serde::Deserialize;
use sqlx::{Pool, Sqlite};

use crate::{
    agent,
    config::{Config, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE},
    lifecycle, storage,
    utils::generate_id,
    HyperfleetError, HyperfleetResult,
};

use super::{Sandbox, SandboxSpec};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How long a synchronous create waits for the agent to answer.
const AGENT_READY_WAIT: Duration = Duration::from_secs(2);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Parameters for creating a sandbox.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSandboxRequest {
    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Base image type; falls back to the configured default.
    #[serde(default)]
    pub image: Option<String>,

    /// vCPU count; falls back to the configured default.
    #[serde(default)]
    pub cpu: Option<u8>,

    /// RAM in MiB; falls back to the configured default.
    #[serde(default)]
    pub mem: Option<u32>,

    /// Environment variables injected through the agent after boot.
    #[serde(default)]
    pub env_vars: HashMap<String, String>,

    /// Wait for the agent to answer before returning (default true).
    #[serde(default)]
    pub sync: Option<bool>,
}

/// Parameters for restoring a sandbox from a snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSandboxRequest {
    /// Absolute path of the snapshot directory to restore from.
    pub snapshot_path: String,

    /// Display name for the restored sandbox.
    #[serde(default)]
    pub name: String,

    /// Address for the new sandbox; auto-allocated when omitted. A live
    /// restore keeps the old in-kernel address regardless.
    #[serde(default)]
    pub new_ip: Option<String>,

    /// vCPU count; the original restore path defaults this to 1.
    #[serde(default)]
    pub cpu: Option<u8>,

    /// RAM in MiB; the original restore path defaults this to 1024.
    #[serde(default)]
    pub mem: Option<u32>,

    /// Cold restore discards the saved RAM and boots fresh.
    #[serde(default)]
    pub cold: bool,
}

/// A page of sandbox records.
#[derive(Debug, Clone)]
pub struct SandboxPage {
    /// The records on this page.
    pub sandboxes: Vec<Sandbox>,

    /// Total records for the filter.
    pub total: i64,

    /// The effective page size after clamping.
    pub page_size: u32,
}

//--------------------------------------------------------------------------------------------------
// Functions: Provisioning
//--------------------------------------------------------------------------------------------------

/// Creates and boots a new sandbox, persisting its record once running.
pub async fn create_sandbox(
    cfg: &Config,
    pool: &Pool<Sqlite>,
    org_id: &str,
    req: CreateSandboxRequest,
) -> HyperfleetResult<Sandbox> {
    let ip = next_available_ip(cfg, pool).await?;
    let id = generate_id();

    let spec = SandboxSpec {
        id: id.clone(),
        image: req
            .image
            .clone()
            .unwrap_or_else(|| cfg.get_sandbox().get_default_image().clone()),
        cpus: req.cpu.unwrap_or(*cfg.get_sandbox().get_default_vcpus()),
        memory_mb: req.mem.unwrap_or(*cfg.get_sandbox().get_default_memory_mb()),
        disk_mb: *cfg.get_sandbox().get_default_disk_mb(),
        ip: ip.clone(),
    };

    let overlay = storage::prepare_instance(cfg, &spec).await?;

    if let Err(e) = lifecycle::start(cfg, &spec, &overlay, None).await {
        tracing::error!(sandbox = %spec.id, error = %e, "boot failed");
        rollback_instance(cfg, &spec.id).await;
        return Err(e);
    }

    // Synchronous readiness gate: make sure the agent answers before the
    // caller gets a handle they will immediately exec against.
    if req.sync.unwrap_or(true) {
        let client = agent::get()?;
        if let Err(e) = client.wait_ready(&spec.id, AGENT_READY_WAIT).await {
            let _ = lifecycle::stop(cfg, &spec.id).await;
            rollback_instance(cfg, &spec.id).await;
            return Err(e);
        }
    }

    // Env injection failure is a warning; the sandbox is otherwise usable.
    if !req.env_vars.is_empty() {
        match agent::get() {
            Ok(client) => {
                if let Err(e) = client.set_env_vars(&spec.id, &req.env_vars).await {
                    tracing::warn!(sandbox = %spec.id, error = %e, "failed to set env vars on agent");
                }
            }
            Err(e) => tracing::warn!(sandbox = %spec.id, error = %e, "agent client unavailable"),
        }
    }

    let env_json = if req.env_vars.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&req.env_vars)?)
    };

    let sandbox = Sandbox {
        id: id.clone(),
        name: req.name,
        image: spec.image.clone(),
        ip,
        cpus: i64::from(spec.cpus),
        memory_mb: i64::from(spec.memory_mb),
        disk_mb: i64::from(spec.disk_mb),
        org_id: org_id.to_string(),
        env_json,
        status: "running".to_string(),
        created_at: Utc::now(),
    };

    if let Err(e) = insert(pool, &sandbox).await {
        let _ = lifecycle::stop(cfg, &id).await;
        rollback_instance(cfg, &id).await;
        return Err(e);
    }

    Ok(sandbox)
}

/// Restores a sandbox from a snapshot under a fresh id and persists it.
pub async fn restore_sandbox(
    cfg: &Config,
    pool: &Pool<Sqlite>,
    org_id: &str,
    req: RestoreSandboxRequest,
) -> HyperfleetResult<Sandbox> {
    let ip = match req.new_ip.clone().filter(|ip| !ip.is_empty()) {
        Some(ip) => ip,
        None => next_available_ip(cfg, pool).await?,
    };

    let spec = SandboxSpec {
        id: generate_id(),
        image: "snapshot".to_string(),
        cpus: req.cpu.unwrap_or(1),
        memory_mb: req.mem.unwrap_or(1024),
        disk_mb: *cfg.get_sandbox().get_default_disk_mb(),
        ip: ip.clone(),
    };

    lifecycle::restore(cfg, &spec, Path::new(&req.snapshot_path), req.cold).await?;

    let sandbox = Sandbox {
        id: spec.id.clone(),
        name: req.name,
        image: spec.image.clone(),
        ip,
        cpus: i64::from(spec.cpus),
        memory_mb: i64::from(spec.memory_mb),
        disk_mb: i64::from(spec.disk_mb),
        org_id: org_id.to_string(),
        env_json: None,
        status: "running".to_string(),
        created_at: Utc::now(),
    };

    insert(pool, &sandbox).await?;
    Ok(sandbox)
}

/// Stops a sandbox, removes its instance tree, and deletes its record.
pub async fn delete_sandbox(
    cfg: &Config,
    pool: &Pool<Sqlite>,
    sandbox_id: &str,
) -> HyperfleetResult<()> {
    lifecycle::delete(cfg, sandbox_id).await?;

    sqlx::query("DELETE FROM sandboxes WHERE id = ?")
        .bind(sandbox_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Allocates the lowest unused host address in the configured CIDR.
///
/// The network/gateway/broadcast addresses are skipped; uniqueness is also
/// enforced by the UNIQUE constraint on the ip column.
pub async fn next_available_ip(cfg: &Config, pool: &Pool<Sqlite>) -> HyperfleetResult<String> {
    let network = cfg.get_network().parsed_cidr().ok_or_else(|| {
        HyperfleetError::InvalidInput(format!(
            "unparseable NETWORK_CIDR: {}",
            cfg.get_network().get_network_cidr()
        ))
    })?;
    let gateway: Option<Ipv4Addr> = cfg.get_network().clean_gateway().parse().ok();
    let subnet_prefix = cfg.get_network().get_subnet_prefix();

    let used: Vec<(String,)> = sqlx::query_as("SELECT ip FROM sandboxes")
        .fetch_all(pool)
        .await?;
    let used: std::collections::HashSet<Ipv4Addr> =
        used.iter().filter_map(|(ip,)| ip.parse().ok()).collect();

    for addr in network.iter() {
        if addr == network.network() || addr == network.broadcast() {
            continue;
        }
        if Some(addr) == gateway {
            continue;
        }
        if !subnet_prefix.is_empty() && !addr.to_string().starts_with(subnet_prefix.as_str()) {
            continue;
        }
        if !used.contains(&addr) {
            return Ok(addr.to_string());
        }
    }

    Err(HyperfleetError::Conflict(format!(
        "no free addresses in {}",
        network
    )))
}

//--------------------------------------------------------------------------------------------------
// Functions: Repository
//--------------------------------------------------------------------------------------------------

/// Fetches a sandbox by id.
pub async fn get_sandbox(pool: &Pool<Sqlite>, sandbox_id: &str) -> HyperfleetResult<Sandbox> {
    sqlx::query_as::<_, Sandbox>("SELECT * FROM sandboxes WHERE id = ?")
        .bind(sandbox_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| HyperfleetError::NotFound(format!("sandbox {}", sandbox_id)))
}

/// Lists every sandbox record.
pub async fn list_sandboxes(pool: &Pool<Sqlite>) -> HyperfleetResult<Vec<Sandbox>> {
    let rows = sqlx::query_as::<_, Sandbox>("SELECT * FROM sandboxes ORDER BY created_at")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Lists an organization's sandboxes, paginated.
pub async fn list_sandboxes_by_org(
    pool: &Pool<Sqlite>,
    org_id: &str,
    page: u32,
    page_size: u32,
) -> HyperfleetResult<SandboxPage> {
    let page = page.max(1);
    let page_size = if page_size == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size.min(MAX_PAGE_SIZE)
    };

    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sandboxes WHERE org_id = ?")
        .bind(org_id)
        .fetch_one(pool)
        .await?;

    let sandboxes = sqlx::query_as::<_, Sandbox>(
        "SELECT * FROM sandboxes WHERE org_id = ? ORDER BY created_at LIMIT ? OFFSET ?",
    )
    .bind(org_id)
    .bind(i64::from(page_size))
    .bind(i64::from((page - 1) * page_size))
    .fetch_all(pool)
    .await?;

    Ok(SandboxPage {
        sandboxes,
        total,
        page_size,
    })
}

/// Overwrites a sandbox's persisted status.
pub async fn update_sandbox_status(
    pool: &Pool<Sqlite>,
    sandbox_id: &str,
    status: &str,
) -> HyperfleetResult<()> {
    sqlx::query("UPDATE sandboxes SET status = ? WHERE id = ?")
        .bind(status)
        .bind(sandbox_id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn insert(pool: &Pool<Sqlite>, sandbox: &Sandbox) -> HyperfleetResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sandboxes
            (id, name, image, ip, cpus, memory_mb, disk_mb, org_id, env_json, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&sandbox.id)
    .bind(&sandbox.name)
    .bind(&sandbox.image)
    .bind(&sandbox.ip)
    .bind(sandbox.cpus)
    .bind(sandbox.memory_mb)
    .bind(sandbox.disk_mb)
    .bind(&sandbox.org_id)
    .bind(&sandbox.env_json)
    .bind(&sandbox.status)
    .bind(sandbox.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

async fn rollback_instance(cfg: &Config, sandbox_id: &str) {
    tracing::warn!(sandbox = %sandbox_id, "rolling back failed instance");
    let dir = lifecycle::InstancePaths::new(cfg, sandbox_id);
    if let Err(e) = tokio::fs::remove_dir_all(dir.dir()).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(sandbox = %sandbox_id, error = %e, "rollback directory removal failed");
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::management::db::tests::test_pool;

    fn sample(id: &str, ip: &str, org: &str) -> Sandbox {
        Sandbox {
            id: id.into(),
            name: "demo".into(),
            image: "debian".into(),
            ip: ip.into(),
            cpus: 1,
            memory_mb: 1024,
            disk_mb: 5120,
            org_id: org.into(),
            env_json: None,
            status: "running".into(),
            created_at: Utc::now(),
        }
    }

    fn test_config() -> Config {
        let _guard = crate::testing::env_lock();
        std::env::remove_var("NETWORK_CIDR");
        std::env::remove_var("GATEWAY_IP");
        Config::from_env()
    }

    #[tokio::test]
    async fn test_insert_get_roundtrip() {
        let (_dir, pool) = test_pool().await;
        let sandbox = sample("65f1c2d3a4b5c6d7e8f90a1b", "192.168.100.2", "o1");
        insert(&pool, &sandbox).await.unwrap();

        let fetched = get_sandbox(&pool, &sandbox.id).await.unwrap();
        assert_eq!(fetched.ip, "192.168.100.2");
        assert_eq!(fetched.status, "running");
        assert_eq!(fetched.cpus, 1);
    }

    #[tokio::test]
    async fn test_duplicate_ip_is_rejected() {
        let (_dir, pool) = test_pool().await;
        insert(&pool, &sample("65f1c2d3a4b5c6d7e8f90a1b", "192.168.100.2", "o1"))
            .await
            .unwrap();
        let err = insert(&pool, &sample("65f1c2d3a4b5c6d7e8f90a1c", "192.168.100.2", "o1"))
            .await
            .unwrap_err();
        assert!(matches!(err, HyperfleetError::Db(_)));
    }

    #[tokio::test]
    async fn test_next_available_ip_skips_used_and_gateway() {
        let cfg = test_config();
        let (_dir, pool) = test_pool().await;

        // Gateway .1 is never handed out; first free is .2.
        assert_eq!(next_available_ip(&cfg, &pool).await.unwrap(), "192.168.100.2");

        insert(&pool, &sample("65f1c2d3a4b5c6d7e8f90a1b", "192.168.100.2", "o1"))
            .await
            .unwrap();
        assert_eq!(next_available_ip(&cfg, &pool).await.unwrap(), "192.168.100.3");
    }

    #[tokio::test]
    async fn test_update_status() {
        let (_dir, pool) = test_pool().await;
        let sandbox = sample("65f1c2d3a4b5c6d7e8f90a1b", "192.168.100.2", "o1");
        insert(&pool, &sandbox).await.unwrap();

        update_sandbox_status(&pool, &sandbox.id, "stopped").await.unwrap();
        assert_eq!(get_sandbox(&pool, &sandbox.id).await.unwrap().status, "stopped");
    }

    #[tokio::test]
    async fn test_pagination_clamps_page_size() {
        let (_dir, pool) = test_pool().await;
        for i in 0..5u8 {
            insert(
                &pool,
                &sample(
                    &format!("65f1c2d3a4b5c6d7e8f90a{:02x}", i),
                    &format!("192.168.100.{}", i + 2),
                    "o1",
                ),
            )
            .await
            .unwrap();
        }

        let page = list_sandboxes_by_org(&pool, "o1", 1, 100_000).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.page_size, MAX_PAGE_SIZE);
        assert_eq!(page.sandboxes.len(), 5);

        let page = list_sandboxes_by_org(&pool, "o1", 2, 2).await.unwrap();
        assert_eq!(page.sandboxes.len(), 2);

        let page = list_sandboxes_by_org(&pool, "other", 1, 10).await.unwrap();
        assert_eq!(page.total, 0);
        assert!(page.sandboxes.is_empty());
    }
}
