//! # Application / Join Backends
//!
//! Out of scope per spec §1, but the core invokes two operations on them.
//! Modeled as traits plus mock implementations, the same way the teacher
//! treats its hardware radio layer as a trait behind `stub`/test doubles
//! when no physical device is attached.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::NsError;
use crate::types::{AesKey128, AppSKey, DevEui, JoinEui, NwkSKey};

/// Metadata handed alongside an uplink's application payload.
#[derive(Debug, Clone)]
pub struct UplinkMetadata {
    pub dev_eui: DevEui,
    pub f_port: u8,
    pub f_cnt: u32,
}

#[async_trait]
pub trait ApplicationBackend: Send + Sync {
    async fn handle_uplink_data(&self, payload: &[u8], meta: UplinkMetadata) -> Result<(), NsError>;
}

/// Join-accept payload returned by the join-server collaborator. OTAA
/// cryptography itself is delegated entirely to `JoinBackend` — out of
/// scope per spec §1's Non-goals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinAccept {
    pub dev_addr: crate::types::DevAddr,
    pub app_s_key: AppSKey,
    pub nwk_s_key: NwkSKey,
    pub rx1_dr_offset: u8,
    pub rx2_data_rate: u8,
    pub rx2_frequency_hz: u32,
    /// The already MIC'd and encrypted JoinAccept PHY payload, ready to
    /// transmit as-is. OTAA cryptography is delegated entirely to the join
    /// server per spec §1's Non-goals, so the core never builds this itself.
    pub encoded_phy_payload: Vec<u8>,
}

#[async_trait]
pub trait JoinBackend: Send + Sync {
    async fn join_request(
        &self,
        join_eui: JoinEui,
        dev_eui: DevEui,
        dev_nonce: u16,
    ) -> Result<JoinAccept, NsError>;
}

/// In-memory application backend for tests: records delivered payloads.
pub struct RecordingApplicationBackend {
    deliveries: tokio::sync::Mutex<Vec<(DevEui, Vec<u8>)>>,
}

impl Default for RecordingApplicationBackend {
    fn default() -> Self {
        Self { deliveries: tokio::sync::Mutex::new(Vec::new()) }
    }
}

impl RecordingApplicationBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn deliveries(&self) -> Vec<(DevEui, Vec<u8>)> {
        self.deliveries.lock().await.clone()
    }
}

#[async_trait]
impl ApplicationBackend for RecordingApplicationBackend {
    async fn handle_uplink_data(&self, payload: &[u8], meta: UplinkMetadata) -> Result<(), NsError> {
        self.deliveries.lock().await.push((meta.dev_eui, payload.to_vec()));
        Ok(())
    }
}

/// Deterministic in-memory join backend for local runs and tests: derives
/// a DevAddr from the DevEUI and hands back fixed session keys and RX2
/// parameters. No OTAA cryptography is performed here either — the
/// "encoded" join-accept payload is a placeholder frame, standing in for
/// whatever a real join server would return.
pub struct StaticJoinBackend {
    next_addr_suffix: std::sync::atomic::AtomicU32,
}

impl Default for StaticJoinBackend {
    fn default() -> Self {
        Self { next_addr_suffix: std::sync::atomic::AtomicU32::new(1) }
    }
}

impl StaticJoinBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JoinBackend for StaticJoinBackend {
    async fn join_request(
        &self,
        _join_eui: JoinEui,
        dev_eui: DevEui,
        dev_nonce: u16,
    ) -> Result<JoinAccept, NsError> {
        let suffix = self.next_addr_suffix.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let dev_addr = crate::types::DevAddr(suffix);

        let mut app_key_bytes = [0u8; 16];
        app_key_bytes[..8].copy_from_slice(&dev_eui.0);
        app_key_bytes[8..10].copy_from_slice(&dev_nonce.to_le_bytes());

        let mut encoded_phy_payload = vec![0x20u8]; // MHDR: JoinAccept
        encoded_phy_payload.extend_from_slice(&dev_addr.0.to_le_bytes());
        encoded_phy_payload.extend_from_slice(&[0u8; 4]); // placeholder MIC

        Ok(JoinAccept {
            dev_addr,
            app_s_key: AesKey128(app_key_bytes),
            nwk_s_key: AesKey128(app_key_bytes),
            rx1_dr_offset: 0,
            rx2_data_rate: 0,
            rx2_frequency_hz: 869_525_000,
            encoded_phy_payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_join_backend_assigns_distinct_addrs() {
        let backend = StaticJoinBackend::new();
        let a = backend.join_request(JoinEui([0; 8]), DevEui([1; 8]), 1).await.unwrap();
        let b = backend.join_request(JoinEui([0; 8]), DevEui([2; 8]), 2).await.unwrap();
        assert_ne!(a.dev_addr, b.dev_addr);
    }

    #[tokio::test]
    async fn recording_backend_records_payload() {
        let backend = RecordingApplicationBackend::new();
        backend
            .handle_uplink_data(&[1, 2, 3], UplinkMetadata { dev_eui: DevEui([0; 8]), f_port: 1, f_cnt: 1 })
            .await
            .unwrap();
        assert_eq!(backend.deliveries().await, vec![(DevEui([0; 8]), vec![1, 2, 3])]);
    }
}
