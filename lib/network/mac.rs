use std::net::Ipv4Addr;

use crate::{HyperfleetError, HyperfleetResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The locally-administered OUI prefix reserved for sandbox NICs.
const MAC_PREFIX: [u8; 3] = [0x52, 0x54, 0x00];

/// Offset added to the low IPv4 octet to form the vsock guest CID.
/// CIDs 0-2 are reserved by the vsock spec; 1000 keeps well clear.
const VSOCK_CID_OFFSET: u32 = 1000;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Derives the sandbox NIC MAC address from its IPv4 address.
///
/// The high three bytes are the fixed prefix; the low three bytes are the
/// low three octets of the address. The derivation is pure, so a restored
/// sandbox keeps the same MAC and stays identifiable at the ARP level.
pub fn generate_mac(ip: &str) -> HyperfleetResult<String> {
    let addr: Ipv4Addr = ip
        .parse()
        .map_err(|_| HyperfleetError::InvalidInput(format!("invalid IPv4 address: {}", ip)))?;
    let octets = addr.octets();

    Ok(format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        MAC_PREFIX[0], MAC_PREFIX[1], MAC_PREFIX[2], octets[1], octets[2], octets[3]
    ))
}

/// Derives the vsock guest CID from the sandbox IPv4 address.
///
/// Unique only within the active fleet: two sandboxes sharing a low octet
/// cannot coexist because their IPs would collide first.
pub fn vsock_cid(ip: &str) -> u32 {
    ip.parse::<Ipv4Addr>()
        .map(|addr| u32::from(addr.octets()[3]) + VSOCK_CID_OFFSET)
        .unwrap_or(0)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_mac_is_deterministic() {
        let first = generate_mac("10.20.3.42").unwrap();
        for _ in 0..8 {
            assert_eq!(generate_mac("10.20.3.42").unwrap(), first);
        }
    }

    #[test]
    fn test_generate_mac_encodes_low_octets() {
        let mac = generate_mac("10.20.3.42").unwrap();
        assert_eq!(mac, "52:54:00:14:03:2a");

        let mac = generate_mac("192.168.100.7").unwrap();
        assert_eq!(mac, "52:54:00:a8:64:07");
    }

    #[test]
    fn test_generate_mac_rejects_garbage() {
        assert!(generate_mac("not-an-ip").is_err());
        assert!(generate_mac("10.20.3").is_err());
        assert!(generate_mac("").is_err());
    }

    #[test]
    fn test_vsock_cid_offset() {
        assert_eq!(vsock_cid("192.168.100.7"), 1007);
        assert_eq!(vsock_cid("10.0.0.255"), 1255);
        assert_eq!(vsock_cid("garbage"), 0);
    }

    #[test]
    fn test_vsock_cid_unique_per_low_octet() {
        // Two distinct low octets never collide.
        assert_ne!(vsock_cid("192.168.100.7"), vsock_cid("192.168.100.8"));
    }
}
