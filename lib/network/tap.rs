use rand::Rng;
use tokio::process::Command;

use crate::{HyperfleetError, HyperfleetResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates a detached TAP device with a random suffix under `prefix`.
///
/// The device is NOT attached to the bridge here; enslavement happens in
/// [`enable_tap`] only after the VMM has opened the device. `mac` is the
/// guest NIC address derived from the sandbox IP; it travels in the VMM net
/// config, not on the TAP itself.
pub async fn create_random_tap(mac: &str, prefix: &str) -> HyperfleetResult<String> {
    let suffix: String = {
        let mut rng = rand::thread_rng();
        (0..6)
            .map(|_| {
                let n: u8 = rng.gen_range(0..16);
                char::from_digit(n as u32, 16).unwrap_or('0')
            })
            .collect()
    };
    // Linux interface names cap at 15 bytes.
    let name = format!("{}{}", prefix, suffix);

    run_ip(&["tuntap", "add", "dev", &name, "mode", "tap"])
        .await
        .map_err(|e| HyperfleetError::NetworkSetup {
            device: name.clone(),
            reason: format!("tap creation refused: {}", e),
        })?;

    tracing::debug!(tap = %name, mac = %mac, "created detached TAP device");
    Ok(name)
}

/// Enslaves `name` to `bridge` and brings it up (late binding).
pub async fn enable_tap(bridge: &str, name: &str) -> HyperfleetResult<()> {
    run_ip(&["link", "set", "dev", name, "master", bridge])
        .await
        .map_err(|e| HyperfleetError::NetworkSetup {
            device: name.to_string(),
            reason: format!("attach to bridge {} failed: {}", bridge, e),
        })?;

    run_ip(&["link", "set", "dev", name, "up"])
        .await
        .map_err(|e| HyperfleetError::NetworkSetup {
            device: name.to_string(),
            reason: format!("link up failed: {}", e),
        })?;

    Ok(())
}

/// Deletes a TAP device. Callers treat failures as best-effort cleanup.
pub async fn delete_tap(name: &str) -> HyperfleetResult<()> {
    run_ip(&["link", "del", name])
        .await
        .map_err(|e| HyperfleetError::NetworkSetup {
            device: name.to_string(),
            reason: format!("delete failed: {}", e),
        })
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

async fn run_ip(args: &[&str]) -> HyperfleetResult<()> {
    let output = Command::new("ip").args(args).output().await?;
    if !output.status.success() {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(HyperfleetError::CommandFailed {
            command: format!("ip {}", args.join(" ")),
            output: combined.trim().to_string(),
        });
    }
    Ok(())
}
