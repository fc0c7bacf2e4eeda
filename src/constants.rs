//! LoRaWAN Protocol Constants
//!
//! This module defines constants used by the MAC-layer and PHY-payload
//! handling, based on the LoRaWAN 1.0.x regional parameters and MAC
//! specifications.

/// MHDR MType field mask (top 3 bits of the first PHY payload byte).
pub const MHDR_MTYPE_MASK: u8 = 0b1110_0000;
/// MHDR major version field mask.
pub const MHDR_MAJOR_MASK: u8 = 0b0000_0011;

/// FCtrl ADR bit (uplink and downlink).
pub const FCTRL_ADR: u8 = 0x80;
/// FCtrl ADRACKReq bit (uplink only).
pub const FCTRL_ADR_ACK_REQ: u8 = 0x40;
/// FCtrl ACK bit.
pub const FCTRL_ACK: u8 = 0x20;
/// FCtrl ClassB bit (uplink) / FPending bit (downlink).
pub const FCTRL_CLASS_B_OR_FPENDING: u8 = 0x10;
/// FCtrl FOptsLen mask (low nibble).
pub const FCTRL_FOPTS_LEN_MASK: u8 = 0x0F;

/// MIC length in bytes, all LoRaWAN frame types.
pub const MIC_LEN: usize = 4;

/// Maximum FOpts length carried in the frame header.
pub const MAX_FOPTS_LEN: usize = 15;

/// Default deduplication window (§ deduplication delay).
pub const DEFAULT_DEDUPLICATION_DELAY_MS: u64 = 200;

/// Default maximum forward FCnt gap accepted during 16→32-bit extension.
pub const DEFAULT_MAX_FCNT_GAP: u32 = 16384;

/// RX2 delay is always RX1 delay + 1 second, per the LoRaWAN MAC spec.
pub const RX2_DELAY_OFFSET_SECS: u64 = 1;

/// Default RX1 delay (RxDelay1) in seconds when a device has not
/// negotiated otherwise.
pub const DEFAULT_RX1_DELAY_SECS: u64 = 1;

/// Default JoinAccept delay 1, seconds.
pub const DEFAULT_JOIN_ACCEPT_DELAY1_SECS: u64 = 5;
/// Default JoinAccept delay 2, seconds (always delay1 + 1s on the wire,
/// kept as an explicit constant since join timing is configured
/// independently of data-frame RX delays).
pub const DEFAULT_JOIN_ACCEPT_DELAY2_SECS: u64 = 6;

/// GPS epoch (1980-01-06T00:00:00Z) as a Unix timestamp, used by
/// `DeviceTimeAns`.
pub const GPS_EPOCH_UNIX_SECS: i64 = 315_964_800;
