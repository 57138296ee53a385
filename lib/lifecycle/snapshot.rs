use std::path::{Path, PathBuf};

use tokio::fs;

use crate::{
    config::Config,
    vmm::{SnapshotRequest, VmmClient},
    HyperfleetError, HyperfleetResult,
};

use super::InstancePaths;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Snapshots a sandbox into `snapshots/<YYYYMMDD-HHMMSS>/`.
///
/// The RAM dump must happen while the VM is paused, so a Running sandbox is
/// paused and resumed around `vm.snapshot`. The disk copy can safely run
/// while the VM executes again, because the overlay is copy-on-write and the
/// dump already flushed the guest. Disk copy, temp-to-`state` rename and the
/// read-only lock all happen in the background; the returned snapshot id is
/// usable once finalization completes.
pub async fn create_snapshot(cfg: &Config, sandbox_id: &str) -> HyperfleetResult<String> {
    let paths = InstancePaths::new(cfg, sandbox_id);
    let client = VmmClient::new(paths.vm_sock());

    if !client.socket_exists() {
        return Err(HyperfleetError::NotFound(format!(
            "sandbox {} socket not found, is it running?",
            sandbox_id
        )));
    }

    let state = client.state().await?;
    tracing::info!(sandbox = %sandbox_id, state = %state, "creating snapshot");

    if state != "Running" && state != "Paused" {
        return Err(HyperfleetError::Conflict(format!(
            "cannot snapshot sandbox in state {} (must be Running or Paused)",
            state
        )));
    }

    let was_running = state == "Running";
    if was_running {
        client.put("vm.pause").await?;
        tracing::debug!(sandbox = %sandbox_id, "paused for snapshot");
    }

    let snapshot_id = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
    let snap_dir = paths.snapshots_dir().join(&snapshot_id);
    fs::create_dir_all(&snap_dir).await?;

    let temp_dir = paths.snapshot_temp();
    let _ = fs::remove_dir_all(&temp_dir).await;
    fs::create_dir_all(&temp_dir).await?;

    let request = SnapshotRequest {
        destination_url: format!("file://{}", temp_dir.display()),
    };
    if let Err(e) = client.put_json("vm.snapshot", &request).await {
        if was_running {
            if let Err(resume_err) = client.put("vm.resume").await {
                tracing::warn!(sandbox = %sandbox_id, error = %resume_err, "resume after failed snapshot also failed");
            }
        }
        return Err(e);
    }
    tracing::debug!(sandbox = %sandbox_id, "memory dumped");

    // Resume synchronously so the caller never observes a paused sandbox
    // it did not pause.
    if was_running {
        client.put("vm.resume").await?;
        tracing::debug!(sandbox = %sandbox_id, "resumed after snapshot");
    }

    let overlay = paths.overlay();
    let id_for_log = sandbox_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = finalize_snapshot(&overlay, &snap_dir, &temp_dir).await {
            tracing::error!(sandbox = %id_for_log, error = %e, "snapshot finalization failed");
        }
    });

    Ok(snapshot_id)
}

/// Lists finalized snapshot ids for a sandbox, oldest first.
pub async fn list_snapshots(cfg: &Config, sandbox_id: &str) -> HyperfleetResult<Vec<String>> {
    let snapshots_dir = InstancePaths::new(cfg, sandbox_id).snapshots_dir();

    let mut entries = match fs::read_dir(&snapshots_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            ids.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    ids.sort();
    Ok(ids)
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Copies the overlay next to the dumped state, renames the scratch dir to
/// its final `state` name, and locks every file read-only.
///
/// Partial snapshots only ever exist under `snapshot_temp`; the rename is
/// what makes a snapshot visible as complete.
async fn finalize_snapshot(
    overlay: &Path,
    snap_dir: &Path,
    temp_dir: &Path,
) -> HyperfleetResult<()> {
    let disk_dst = snap_dir.join("overlay.qcow2");
    fs::copy(overlay, &disk_dst).await?;
    tracing::debug!(dst = %disk_dst.display(), "snapshot disk cloned");

    let state_dir = snap_dir.join("state");
    fs::rename(temp_dir, &state_dir).await?;

    lock_read_only(state_dir.clone()).await?;

    tracing::info!(snapshot = %snap_dir.display(), "snapshot finalized");
    Ok(())
}

/// Walks a finalized state tree and sets every file to mode 0444.
async fn lock_read_only(state_dir: PathBuf) -> HyperfleetResult<()> {
    tokio::task::spawn_blocking(move || {
        use std::os::unix::fs::PermissionsExt;

        for entry in walkdir::WalkDir::new(&state_dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => continue,
            };
            if entry.file_type().is_file() {
                let _ =
                    std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(0o444));
            }
        }
    })
    .await
    .map_err(HyperfleetError::custom)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use std::os::unix::fs::PermissionsExt;

    #[tokio::test]
    async fn test_finalize_snapshot_produces_immutable_state() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = dir.path().join("overlay.qcow2");
        fs::write(&overlay, b"disk-bytes").await.unwrap();

        let snap_dir = dir.path().join("snapshots").join("20260802-120000");
        fs::create_dir_all(&snap_dir).await.unwrap();

        let temp_dir = dir.path().join("snapshot_temp");
        fs::create_dir_all(temp_dir.join("nested")).await.unwrap();
        fs::write(temp_dir.join("memory-ranges"), b"ram").await.unwrap();
        fs::write(temp_dir.join("nested").join("config.json"), b"{}")
            .await
            .unwrap();

        finalize_snapshot(&overlay, &snap_dir, &temp_dir).await.unwrap();

        // Temp dir was renamed away; state dir holds the dump.
        assert!(!temp_dir.exists());
        let state_dir = snap_dir.join("state");
        assert!(state_dir.join("memory-ranges").exists());
        assert!(state_dir.join("nested").join("config.json").exists());
        assert_eq!(
            fs::read(snap_dir.join("overlay.qcow2")).await.unwrap(),
            b"disk-bytes"
        );

        // Every file under state/ is locked to 0444.
        for entry in walkdir::WalkDir::new(&state_dir) {
            let entry = entry.unwrap();
            if entry.file_type().is_file() {
                let mode = entry.metadata().unwrap().permissions().mode() & 0o777;
                assert_eq!(mode, 0o444, "file {} not read-only", entry.path().display());
            }
        }
    }

    #[tokio::test]
    async fn test_list_snapshots_empty_when_dir_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = {
            let _guard = crate::testing::env_lock();
            std::env::set_var("INSTANCES_DIR", tmp.path());
            let cfg = Config::from_env();
            std::env::remove_var("INSTANCES_DIR");
            cfg
        };
        let ids = list_snapshots(&cfg, "65f1c2d3a4b5c6d7e8f90a1b").await.unwrap();
        assert!(ids.is_empty());
    }
}
