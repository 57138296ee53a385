//! Background health reconciliation.
//!
//! A periodic sweep reads every sandbox record and reconciles its persisted
//! status against the observed VMM state. Two fast paths avoid touching the
//! API at all: a stopped record with no control socket is left alone, and a
//! running record with no socket is marked stopped (crash inferred). Only
//! when the socket exists is a state probe submitted to the bounded worker
//! pool.

use std::{sync::Arc, time::Duration};

use sqlx::{Pool, Sqlite};
use tokio::{sync::Semaphore, task::JoinSet, time};

use crate::{config::Config, lifecycle::InstancePaths, vmm::VmmClient, HyperfleetResult};

use super::sandboxes;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Per-probe deadline; a stuck VMM must not starve the sweep.
const PROBE_DEADLINE: Duration = Duration::from_secs(2);

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Spawns the reconciler loop. Returns immediately if disabled.
pub fn spawn_reconciler(cfg: Config, pool: Pool<Sqlite>) {
    if !*cfg.get_health().get_enabled() {
        tracing::info!("health reconciler disabled");
        return;
    }

    let interval_secs = (*cfg.get_health().get_interval_secs()).max(1);
    let concurrency = (*cfg.get_health().get_concurrency()).max(1);

    tokio::spawn(async move {
        let mut ticker = time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = refresh_statuses(&cfg, &pool, concurrency).await {
                tracing::warn!(error = %e, "health sweep failed");
            }
        }
    });

    tracing::info!(
        interval_secs,
        concurrency,
        "health reconciler started"
    );
}

/// Runs one full sweep over every sandbox record.
///
/// At most `concurrency` VMM sockets are open at any moment; a sandbox is
/// probed at most once per sweep, and the database is written only when the
/// observed state differs from the persisted one.
pub async fn refresh_statuses(
    cfg: &Config,
    pool: &Pool<Sqlite>,
    concurrency: usize,
) -> HyperfleetResult<()> {
    let sandboxes = sandboxes::list_sandboxes(pool).await?;

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut probes: JoinSet<()> = JoinSet::new();

    for sandbox in sandboxes {
        let client = VmmClient::new(InstancePaths::new(cfg, &sandbox.id).vm_sock());
        let socket_exists = client.socket_exists();

        // Fast path A: stopped and socketless is definitively dead.
        if sandbox.status == "stopped" && !socket_exists {
            continue;
        }

        // Fast path B: running without a socket means the VMM crashed; no
        // probe will answer, go straight to the write.
        // Slow path: the socket exists, so the VMM must be asked whether
        // the guest is Running, Paused or merely Loaded.
        let semaphore = semaphore.clone();
        let pool = pool.clone();
        probes.spawn(async move {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let new_status = if socket_exists {
                match client.state_with_deadline(PROBE_DEADLINE).await {
                    Ok(state) => map_vmm_state(&state),
                    Err(e) => {
                        tracing::debug!(sandbox = %sandbox.id, error = %e, "VMM unresponsive with live socket");
                        "stopped"
                    }
                }
            } else {
                "stopped"
            };

            if sandbox.status != new_status {
                if let Err(e) = sandboxes::update_sandbox_status(&pool, &sandbox.id, new_status).await
                {
                    tracing::warn!(sandbox = %sandbox.id, error = %e, "status update failed");
                } else {
                    tracing::info!(
                        sandbox = %sandbox.id,
                        from = %sandbox.status,
                        to = %new_status,
                        "reconciled sandbox status"
                    );
                }
            }
        });
    }

    // The sweep completes only when every probe has; a newer sweep never
    // races an older one's writes.
    while probes.join_next().await.is_some() {}

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Maps a VMM-reported state onto the persisted status vocabulary.
///
/// `Loaded` means the process is up but the guest never booted (or was
/// restored and not resumed); for the control plane that is "stopped".
fn map_vmm_state(state: &str) -> &'static str {
    match state.to_lowercase().as_str() {
        "running" | "runningvirtualized" => "running",
        "paused" => "paused",
        _ => "stopped",
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;

    use crate::management::db::tests::test_pool;

    fn test_config(instances_dir: &std::path::Path) -> Config {
        let _guard = crate::testing::env_lock();
        std::env::set_var("INSTANCES_DIR", instances_dir);
        let cfg = Config::from_env();
        std::env::remove_var("INSTANCES_DIR");
        cfg
    }

    async fn seed(pool: &Pool<Sqlite>, id: &str, ip: &str, status: &str) {
        sqlx::query(
            r#"
            INSERT INTO sandboxes
                (id, name, image, ip, cpus, memory_mb, disk_mb, org_id, env_json, status, created_at)
            VALUES (?, '', 'debian', ?, 1, 1024, 5120, 'o1', NULL, ?, ?)
            "#,
        )
        .bind(id)
        .bind(ip)
        .bind(status)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(map_vmm_state("Running"), "running");
        assert_eq!(map_vmm_state("RunningVirtualized"), "running");
        assert_eq!(map_vmm_state("Paused"), "paused");
        assert_eq!(map_vmm_state("Loaded"), "stopped");
        assert_eq!(map_vmm_state("Created"), "stopped");
        assert_eq!(map_vmm_state("anything-else"), "stopped");
    }

    #[tokio::test]
    async fn test_sweep_marks_crashed_sandbox_stopped() {
        let instances = tempfile::tempdir().unwrap();
        let cfg = test_config(instances.path());
        let (_dir, pool) = test_pool().await;

        // Running in the DB, but no instance directory / socket on disk.
        seed(&pool, "65f1c2d3a4b5c6d7e8f90a1b", "192.168.100.2", "running").await;

        refresh_statuses(&cfg, &pool, 4).await.unwrap();

        let sandbox = sandboxes::get_sandbox(&pool, "65f1c2d3a4b5c6d7e8f90a1b")
            .await
            .unwrap();
        assert_eq!(sandbox.status, "stopped");
    }

    #[tokio::test]
    async fn test_sweep_leaves_stopped_socketless_sandbox_alone() {
        let instances = tempfile::tempdir().unwrap();
        let cfg = test_config(instances.path());
        let (_dir, pool) = test_pool().await;

        seed(&pool, "65f1c2d3a4b5c6d7e8f90a1c", "192.168.100.3", "stopped").await;

        refresh_statuses(&cfg, &pool, 4).await.unwrap();

        let sandbox = sandboxes::get_sandbox(&pool, "65f1c2d3a4b5c6d7e8f90a1c")
            .await
            .unwrap();
        assert_eq!(sandbox.status, "stopped");
    }

    #[tokio::test]
    async fn test_sweep_is_stable_across_repeats() {
        let instances = tempfile::tempdir().unwrap();
        let cfg = test_config(instances.path());
        let (_dir, pool) = test_pool().await;

        seed(&pool, "65f1c2d3a4b5c6d7e8f90a1d", "192.168.100.4", "running").await;

        refresh_statuses(&cfg, &pool, 4).await.unwrap();
        refresh_statuses(&cfg, &pool, 4).await.unwrap();

        let sandbox = sandboxes::get_sandbox(&pool, "65f1c2d3a4b5c6d7e8f90a1d")
            .await
            .unwrap();
        assert_eq!(sandbox.status, "stopped");
    }

    #[tokio::test]
    async fn test_sweep_probes_live_socket() {
        use tokio::{
            io::{AsyncReadExt, AsyncWriteExt},
            net::UnixListener,
        };

        let instances = tempfile::tempdir().unwrap();
        let cfg = test_config(instances.path());
        let (_dir, pool) = test_pool().await;

        let id = "65f1c2d3a4b5c6d7e8f90a1e";
        seed(&pool, id, "192.168.100.5", "stopped").await;

        // A fake VMM that reports Paused.
        let sock_dir = instances.path().join(id);
        std::fs::create_dir_all(&sock_dir).unwrap();
        let listener = UnixListener::bind(sock_dir.join("vm.sock")).unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 18\r\n\r\n{\"state\":\"Paused\"}",
                )
                .await
                .unwrap();
        });

        refresh_statuses(&cfg, &pool, 4).await.unwrap();

        let sandbox = sandboxes::get_sandbox(&pool, id).await.unwrap();
        assert_eq!(sandbox.status, "paused");
        server.abort();
    }
}
