//! Overlay disk preparation.
//!
//! Every sandbox boots from a qcow2 overlay whose backing file is a shared,
//! read-only base image. The base image is never mutated; per-sandbox writes
//! land in the overlay.

use std::path::{Path, PathBuf};

use tokio::{fs, process::Command};

use crate::{
    config::Config, management::SandboxSpec, HyperfleetError, HyperfleetResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Suffix appended to an image type to form its base image filename.
const BASE_IMAGE_SUFFIX: &str = "-base.qcow2";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates the instance directory and its copy-on-write overlay disk.
///
/// Resolves `<base_images>/<image>-base.qcow2` as the backing file and sizes
/// the overlay to the requested disk. Returns the overlay path.
pub async fn prepare_instance(cfg: &Config, spec: &SandboxSpec) -> HyperfleetResult<PathBuf> {
    let base_path = base_image_path(cfg, &spec.image);

    let instance_dir = Path::new(cfg.get_paths().get_instances_dir()).join(&spec.id);
    fs::create_dir_all(&instance_dir).await?;

    let overlay_path = instance_dir.join("overlay.qcow2");
    let size_arg = format!("{}M", spec.disk_mb);

    tracing::info!(
        sandbox = %spec.id,
        base = %base_path.display(),
        overlay = %overlay_path.display(),
        size = %size_arg,
        "preparing instance overlay"
    );

    let output = Command::new("qemu-img")
        .arg("create")
        .arg("-f")
        .arg("qcow2")
        .arg("-b")
        .arg(&base_path)
        .arg("-F")
        .arg("qcow2")
        .arg(&overlay_path)
        .arg(&size_arg)
        .output()
        .await?;

    if !output.status.success() {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(HyperfleetError::CommandFailed {
            command: "qemu-img create".to_string(),
            output: combined.trim().to_string(),
        });
    }

    Ok(overlay_path)
}

/// Resolves the base image path for an image type.
pub fn base_image_path(cfg: &Config, image: &str) -> PathBuf {
    Path::new(cfg.get_paths().get_base_images_dir())
        .join(format!("{}{}", image, BASE_IMAGE_SUFFIX))
}
