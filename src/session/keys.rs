//! Persisted-state key builders, implementing the one-namespace layout of
//! spec §6 literally so every caller builds keys the same way.

use crate::types::{DevAddr, DevEui};

pub fn device_session(dev_eui: DevEui) -> String {
    format!("lora:ns:device-session:{dev_eui}")
}

pub fn devaddr_set(dev_addr: DevAddr) -> String {
    format!("lora:ns:devaddr:{dev_addr}")
}

pub fn dedup_set(fingerprint: u64) -> String {
    format!("lora:ns:dedup:{fingerprint:016x}")
}

pub fn downlink_candidates(dev_eui: DevEui, token: u16) -> String {
    format!("lora:ns:downlink:{dev_eui}:{token:04x}")
}

/// Reverse index from a downlink token to its owning DevEUI, so a gateway
/// ack (which only carries the token) can be routed back to
/// `downlink_candidates`.
pub fn downlink_token_owner(token: u16) -> String {
    format!("lora:ns:downlink-token:{token:04x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_match_documented_layout() {
        let eui = DevEui([0xAA; 8]);
        assert_eq!(device_session(eui), "lora:ns:device-session:aaaaaaaaaaaaaaaa");
        assert_eq!(downlink_candidates(eui, 0x1234), "lora:ns:downlink:aaaaaaaaaaaaaaaa:1234");
    }
}
