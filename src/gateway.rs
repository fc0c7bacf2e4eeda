//! # Gateway Backend
//!
//! Two inbound channels (uplink frames, downlink-TX acks) and one outbound
//! operation, kept bit-compatible with the protobuf-shaped wire contract of
//! spec §6. Modeled as a connect-returns-handle async trait plus out-of-band
//! channels, mirroring the teacher's `WMBusHandle` pattern rather than
//! putting the channels on the trait itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::NsError;
use crate::types::{DownlinkTiming, GatewayId, RxInfo, TxInfo};

/// One gateway-labeled uplink as received from the wire backend, before
/// deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UplinkFrame {
    pub phy_payload: Vec<u8>,
    pub rx_info: RxInfo,
    pub tx_info: TxInfo,
}

/// A candidate downlink, as sent to a gateway. Invariant: `token` uniquely
/// identifies the frame within the gateway's recent history, used to match
/// TX acks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownlinkFrame {
    pub gateway_id: GatewayId,
    pub phy_payload: Vec<u8>,
    pub frequency_hz: u32,
    pub tx_info: TxInfo,
    pub power_dbm: i8,
    pub timing: DownlinkTiming,
    pub token: u16,
    /// Copied from the uplink context id for log correlation.
    pub downlink_id: u64,
}

/// The standard rejection codes that trigger RX1→RX2 fall-through, per
/// spec §4.4.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxAckError {
    TooLate,
    TooEarly,
    CollisionPacket,
    CollisionBeacon,
    TxFreq,
    TxPower,
    GpsUnlocked,
    /// Any other backend-reported failure; fatal for this downlink.
    Other(String),
}

impl TxAckError {
    /// Whether this error should trigger the next saved candidate.
    pub fn triggers_fallthrough(&self) -> bool {
        !matches!(self, TxAckError::Other(_))
    }
}

/// A downlink-TX acknowledgement from a gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownlinkTxAck {
    pub gateway_id: GatewayId,
    pub token: u16,
    pub error: Option<TxAckError>,
}

/// Pluggable gateway wire backend. No real MQTT/UDP implementation is in
/// scope (spec §1's Non-goals) — `ChannelGatewayBackend` below is the one
/// in-memory test double.
#[async_trait]
pub trait GatewayBackend: Send + Sync {
    async fn send(&self, frame: DownlinkFrame) -> Result<(), NsError>;
}

/// In-memory gateway backend for tests and local runs: `send` simply
/// forwards the frame onto a channel the test harness can drain.
pub struct ChannelGatewayBackend {
    sender: tokio::sync::mpsc::Sender<DownlinkFrame>,
}

impl ChannelGatewayBackend {
    pub fn new(sender: tokio::sync::mpsc::Sender<DownlinkFrame>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl GatewayBackend for ChannelGatewayBackend {
    async fn send(&self, frame: DownlinkFrame) -> Result<(), NsError> {
        self.sender
            .send(frame)
            .await
            .map_err(|e| NsError::Transient(format!("gateway channel closed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_errors_do_not_trigger_fallthrough() {
        assert!(!TxAckError::Other("boom".into()).triggers_fallthrough());
        assert!(TxAckError::TooLate.triggers_fallthrough());
    }
}
