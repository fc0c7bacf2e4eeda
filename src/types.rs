//! # Wire Types
//!
//! Concrete identifier and radio-info types the abstract data model assumes
//! exist: `DevEui`, `DevAddr`, `JoinEui`, session keys, and the per-gateway
//! `RxInfo`/`TxInfo` pair carried alongside every uplink.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::util::hex::encode_hex;

/// 8-byte device identifier, stable for the lifetime of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevEui(pub [u8; 8]);

impl DevEui {
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }
}

impl std::fmt::Display for DevEui {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// 8-byte join identifier (AppEUI in LoRaWAN 1.0.x terminology).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinEui(pub [u8; 8]);

/// 4-byte short address assigned at join, not globally unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevAddr(pub u32);

impl DevAddr {
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0.to_be_bytes())
    }
}

impl std::fmt::Display for DevAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// 8-byte gateway identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GatewayId(pub [u8; 8]);

impl GatewayId {
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }
}

impl std::fmt::Display for GatewayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// 128-bit AES session key. Zeroized on drop since it is key material.
#[derive(Clone, Serialize, Deserialize, Zeroize)]
#[zeroize(drop)]
pub struct AesKey128(pub [u8; 16]);

impl std::fmt::Debug for AesKey128 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesKey128(***)")
    }
}

/// Application session key (encrypts FRMPayload on FPort>0).
pub type AppSKey = AesKey128;
/// Network session key (MIC, and FRMPayload when FPort==0).
pub type NwkSKey = AesKey128;

/// Device class of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    A,
    B,
    C,
}

/// One gateway's reception report for a single uplink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxInfo {
    pub gateway_id: GatewayId,
    pub rssi: i32,
    pub lora_snr: f64,
    pub board: u32,
    pub antenna: u32,
    /// Opaque gateway-backend timing context, echoed back unmodified when
    /// scheduling the downlink on this gateway.
    pub context: Vec<u8>,
}

/// LoRa/FSK data rate expressed as a tagged union, matching the gateway
/// wire protocol's data-rate representation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DataRate {
    Lora { spreading_factor: u8, bandwidth_khz: u32 },
    Fsk { bitrate: u32 },
}

/// Canonical TX-info for one uplink (taken from the best gateway) or one
/// downlink candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInfo {
    pub frequency_hz: u32,
    pub data_rate: DataRate,
}

/// Downlink timing mode, matching the gateway wire protocol's tagged union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DownlinkTiming {
    Immediately,
    Delay { duration: std::time::Duration },
    GpsEpoch { timestamp: std::time::Duration },
}

/// FCtrl bit flags, shared by uplink and downlink frame headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FCtrl {
    pub adr: bool,
    /// Uplink: ADRACKReq. Downlink: unused.
    pub adr_ack_req: bool,
    pub ack: bool,
    /// Uplink: ClassB. Downlink: FPending.
    pub class_b_or_fpending: bool,
    pub fopts_len: u8,
}

impl FCtrl {
    pub fn from_byte(b: u8) -> Self {
        use crate::constants::*;
        Self {
            adr: b & FCTRL_ADR != 0,
            adr_ack_req: b & FCTRL_ADR_ACK_REQ != 0,
            ack: b & FCTRL_ACK != 0,
            class_b_or_fpending: b & FCTRL_CLASS_B_OR_FPENDING != 0,
            fopts_len: b & FCTRL_FOPTS_LEN_MASK,
        }
    }

    pub fn to_byte(self) -> u8 {
        use crate::constants::*;
        let mut b = self.fopts_len & FCTRL_FOPTS_LEN_MASK;
        if self.adr {
            b |= FCTRL_ADR;
        }
        if self.adr_ack_req {
            b |= FCTRL_ADR_ACK_REQ;
        }
        if self.ack {
            b |= FCTRL_ACK;
        }
        if self.class_b_or_fpending {
            b |= FCTRL_CLASS_B_OR_FPENDING;
        }
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fctrl_roundtrip() {
        let f = FCtrl { adr: true, adr_ack_req: false, ack: true, class_b_or_fpending: false, fopts_len: 3 };
        assert_eq!(FCtrl::from_byte(f.to_byte()), f);
    }

    #[test]
    fn dev_eui_hex() {
        let eui = DevEui([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(eui.to_hex(), "0102030405060708");
    }
}
