use std::{path::Path, time::Duration};

use tokio::{fs, time};

use crate::{
    config::Config, management::SandboxSpec, vmm::VmmClient, HyperfleetError, HyperfleetResult,
};

use super::{boot, InstancePaths};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Grace period for the control socket to start accepting connections
/// before the post-restore resume.
const RESUME_SETTLE: Duration = Duration::from_millis(5);

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reconstitutes a sandbox from a snapshot under a new id.
///
/// Live mode copies the RAM state and resumes the guest with its previous
/// kernel memory image, so the in-kernel IP is unchanged regardless of
/// `spec.ip`. Cold mode discards the RAM and performs a full boot, which is
/// what allows IP reassignment via the kernel command line.
pub async fn restore(
    cfg: &Config,
    spec: &SandboxSpec,
    snapshot_path: &Path,
    cold: bool,
) -> HyperfleetResult<()> {
    let paths = InstancePaths::new(cfg, &spec.id);
    tracing::info!(
        sandbox = %spec.id,
        snapshot = %snapshot_path.display(),
        cold,
        "restoring sandbox"
    );

    if paths.dir().exists() {
        return Err(HyperfleetError::Conflict(format!(
            "sandbox {} already exists",
            spec.id
        )));
    }
    fs::create_dir_all(paths.dir()).await?;

    let src_disk = snapshot_path.join("overlay.qcow2");
    let dst_disk = paths.overlay();
    if let Err(e) = fs::copy(&src_disk, &dst_disk).await {
        let _ = fs::remove_dir_all(paths.dir()).await;
        return Err(HyperfleetError::custom(anyhow::anyhow!(
            "snapshot disk copy from {} failed: {}",
            src_disk.display(),
            e
        )));
    }

    let restore_state = if cold {
        tracing::debug!(sandbox = %spec.id, "cold restore, discarding saved RAM");
        None
    } else {
        let src_state = snapshot_path.join("state");
        let dst_state = paths.snapshot_state();
        if let Err(e) = copy_dir(&src_state, &dst_state).await {
            let _ = fs::remove_dir_all(paths.dir()).await;
            return Err(HyperfleetError::custom(anyhow::anyhow!(
                "snapshot state copy from {} failed: {}",
                src_state.display(),
                e
            )));
        }
        Some(dst_state)
    };

    boot::start(cfg, spec, &dst_disk, restore_state.as_deref()).await?;

    // A restored VM comes back Loaded/Paused; nudge it. A failed resume is
    // a warning, not a failure: the VM can still be resumed by a later call.
    if !cold {
        let client = VmmClient::new(paths.vm_sock());
        client.wait_for_socket(Duration::from_secs(2)).await?;
        time::sleep(RESUME_SETTLE).await;

        match client.put("vm.resume").await {
            Ok(()) => tracing::info!(sandbox = %spec.id, "restored VM resumed"),
            Err(e) => tracing::warn!(sandbox = %spec.id, error = %e, "resume after restore failed"),
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Recursively copies a directory tree without following symlinks.
async fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst).await?;

    let mut stack = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((src_dir, dst_dir)) = stack.pop() {
        let mut entries = fs::read_dir(&src_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let target = dst_dir.join(entry.file_name());
            if file_type.is_dir() {
                fs::create_dir_all(&target).await?;
                stack.push((entry.path(), target));
            } else if file_type.is_file() {
                fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_dir_preserves_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("state");
        fs::create_dir_all(src.join("a/b")).await.unwrap();
        fs::write(src.join("top"), b"1").await.unwrap();
        fs::write(src.join("a/mid"), b"22").await.unwrap();
        fs::write(src.join("a/b/leaf"), b"333").await.unwrap();

        let dst = dir.path().join("copy");
        copy_dir(&src, &dst).await.unwrap();

        assert_eq!(fs::read(dst.join("top")).await.unwrap(), b"1");
        assert_eq!(fs::read(dst.join("a/mid")).await.unwrap(), b"22");
        assert_eq!(fs::read(dst.join("a/b/leaf")).await.unwrap(), b"333");
    }

    #[tokio::test]
    async fn test_restore_refuses_existing_instance_dir() {
        let instances = tempfile::tempdir().unwrap();
        let cfg = {
            let _guard = crate::testing::env_lock();
            std::env::set_var("INSTANCES_DIR", instances.path());
            let cfg = Config::from_env();
            std::env::remove_var("INSTANCES_DIR");
            cfg
        };

        let spec = SandboxSpec {
            id: "65f1c2d3a4b5c6d7e8f90a1b".into(),
            image: "snapshot".into(),
            cpus: 1,
            memory_mb: 1024,
            disk_mb: 0,
            ip: "192.168.100.7".into(),
        };

        fs::create_dir_all(instances.path().join(&spec.id))
            .await
            .unwrap();

        let snapshot = tempfile::tempdir().unwrap();
        let err = restore(&cfg, &spec, snapshot.path(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, HyperfleetError::Conflict(_)));
    }
}
