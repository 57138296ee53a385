//! Opaque 24-hex identifiers.
//!
//! Sandbox, org, user, image and key records all use the same identifier
//! shape: 12 bytes rendered as 24 lowercase hex characters. The first four
//! bytes are a unix timestamp so ids sort roughly by creation time; the rest
//! are random. The id doubles as the instance directory name and as the
//! synthetic HTTP host for the agent transport, so it must stay
//! filesystem- and hostname-safe.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Generates a new 24-hex identifier.
pub fn generate_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);

    let mut tail = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut tail);

    let mut out = String::with_capacity(24);
    for byte in secs.to_be_bytes() {
        out.push_str(&format!("{:02x}", byte));
    }
    for byte in tail {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Returns true if `id` is a well-formed 24-hex identifier.
pub fn is_valid_id(id: &str) -> bool {
    id.len() == 24 && id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_valid() {
        for _ in 0..32 {
            let id = generate_id();
            assert_eq!(id.len(), 24);
            assert!(is_valid_id(&id), "invalid id generated: {}", id);
        }
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_validation_rejects_bad_shapes() {
        assert!(is_valid_id("65f1c2d3a4b5c6d7e8f90a1b"));
        assert!(!is_valid_id("65F1C2D3A4B5C6D7E8F90A1B")); // uppercase
        assert!(!is_valid_id("65f1c2d3a4b5c6d7e8f90a1")); // short
        assert!(!is_valid_id("65f1c2d3a4b5c6d7e8f90a1bc")); // long
        assert!(!is_valid_id("65f1c2d3a4b5c6d7e8f90a1g")); // non-hex
        assert!(!is_valid_id("../../../../../etc/passwd")); // hostile
        assert!(!is_valid_id(""));
    }
}
