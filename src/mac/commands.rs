//! MAC-command identifiers and their request/answer payloads.
//!
//! One struct per CID's pending-request parameters, plus one struct per
//! CID's answer ack bits — kept as plain data so the engine's reconciliation
//! table (`engine.rs`) reads as a straight match over `Cid`, the way the
//! teacher's `lora::params` module keeps spreading-factor/bandwidth/coding-
//! rate as small plain enums consumed by the modulation code rather than
//! folding behavior into them.

use serde::{Deserialize, Serialize};

/// MAC-command identifier byte. Only the CIDs this core negotiates are
/// modeled; unrecognized CIDs are treated as `NsError::BadArgument` by the
/// caller, not added here speculatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cid {
    LinkCheck,
    LinkAdr,
    DutyCycle,
    RxParamSetup,
    DevStatus,
    NewChannel,
    RxTimingSetup,
    TxParamSetup,
    DlChannel,
    RekeyInd,
    AdrParamSetup,
    DeviceTime,
    ResetInd,
    RejoinParamSetup,
    PingSlotInfo,
    PingSlotChannel,
    BeaconFreq,
    DeviceModeInd,
}

impl Cid {
    /// Device-initiated CIDs the engine accepts even with no pending block,
    /// per the spec's reconciliation exception list.
    pub fn is_device_initiated(self) -> bool {
        matches!(
            self,
            Cid::DeviceTime
                | Cid::LinkCheck
                | Cid::DeviceModeInd
                | Cid::ResetInd
                | Cid::RekeyInd
                | Cid::RejoinParamSetup
        )
    }
}

/// Pending `LinkADRReq` parameters, as sent to the device and retained until
/// the matching `LinkADRAns` (or a retransmit) arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkAdrReq {
    pub ch_mask: Vec<bool>,
    pub data_rate: u8,
    pub tx_power: u8,
    /// Requested number of repetitions; 0 means "leave NbTrans unchanged".
    pub nb_rep: u8,
}

/// `LinkADRAns` ack bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAdrAns {
    pub channel_mask_ack: bool,
    pub data_rate_ack: bool,
    pub power_ack: bool,
}

/// Pending `PingSlotChannelReq` parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PingSlotChannelReq {
    pub frequency_hz: u32,
    pub data_rate: u8,
}

/// `PingSlotChannelAns` ack bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingSlotChannelAns {
    pub data_rate_ok: bool,
    pub channel_frequency_ok: bool,
}

/// Pending `RXParamSetupReq` parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RxParamSetupReq {
    pub rx1_dr_offset: u8,
    pub rx2_data_rate: u8,
    pub rx2_frequency_hz: u32,
}

/// `RXParamSetupAns` ack bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxParamSetupAns {
    pub channel_ack: bool,
    pub rx2_data_rate_ack: bool,
    pub rx1_dr_offset_ack: bool,
}

impl RxParamSetupAns {
    pub fn all_ok(self) -> bool {
        self.channel_ack && self.rx2_data_rate_ack && self.rx1_dr_offset_ack
    }
}

/// Pending `NewChannelReq` parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewChannelReq {
    pub ch_index: u8,
    pub frequency_hz: u32,
    pub min_dr: u8,
    pub max_dr: u8,
}

/// `NewChannelAns` ack bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChannelAns {
    pub frequency_ok: bool,
    pub data_rate_range_ok: bool,
}

/// `DevStatusAns` payload (no pending request is needed; this is a direct
/// report).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DevStatusAns {
    pub battery: u8,
    pub margin: i8,
}

/// `DeviceTimeAns` payload, built by the engine from the current GPS epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceTimeAns {
    pub seconds_since_gps_epoch: u32,
    pub fractional_second: u8,
}

/// `LinkCheckAns` payload, built by the engine from the uplink's RX-info
/// set and the best SNR observed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkCheckAns {
    pub margin_db: i32,
    pub gateway_count: u8,
}
