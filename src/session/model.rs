//! `DeviceSession`, the central mutable entity keyed by DevEUI, and the
//! pending MAC-command block it carries per command identifier.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::mac::commands::{Cid, LinkAdrReq, NewChannelReq, PingSlotChannelReq, RxParamSetupReq};
use crate::types::{AppSKey, DevAddr, DevEui, DeviceClass, NwkSKey, RxInfo};

/// Bound on `DeviceSession::adr_history`, matching the teacher ADR
/// controller's default averaging window.
const ADR_HISTORY_CAPACITY: usize = 20;

/// One pending request this session is waiting on an answer for. All
/// requests belonging to one `MacCommandBlock` carry the same CID, which is
/// the block's invariant rather than each variant's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PendingRequest {
    LinkAdr(LinkAdrReq),
    PingSlotChannel(PingSlotChannelReq),
    RxParamSetup(RxParamSetupReq),
    NewChannel(NewChannelReq),
    /// A `DevStatusReq` carries no parameters; its presence alone records
    /// that the server is awaiting a `DevStatusAns`.
    DevStatus,
}

impl PendingRequest {
    pub fn cid(&self) -> Cid {
        match self {
            PendingRequest::LinkAdr(_) => Cid::LinkAdr,
            PendingRequest::PingSlotChannel(_) => Cid::PingSlotChannel,
            PendingRequest::RxParamSetup(_) => Cid::RxParamSetup,
            PendingRequest::NewChannel(_) => Cid::NewChannel,
            PendingRequest::DevStatus => Cid::DevStatus,
        }
    }
}

/// Ordered sequence of MAC commands sharing one CID, held on the session
/// until the matching answer arrives or it is replaced by a retransmit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacCommandBlock {
    cid: Cid,
    requests: Vec<PendingRequest>,
}

impl MacCommandBlock {
    /// Builds a block from a non-empty, CID-homogeneous request list.
    /// Returns `None` on an empty list or a CID mismatch, enforcing the
    /// invariant at construction rather than leaving it implicit.
    pub fn new(requests: Vec<PendingRequest>) -> Option<Self> {
        let cid = requests.first()?.cid();
        if requests.iter().any(|r| r.cid() != cid) {
            return None;
        }
        Some(Self { cid, requests })
    }

    pub fn cid(&self) -> Cid {
        self.cid
    }

    pub fn requests(&self) -> &[PendingRequest] {
        &self.requests
    }
}

/// One (SNR, uplink-counter) sample for the ADR evaluator's history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdrHistoryEntry {
    pub snr: f32,
    pub uplink_count: u32,
}

/// The central mutable entity, keyed by 8-byte DevEUI. Owned by the Session
/// Store and leased by value into the uplink pipeline; the pipeline writes
/// it back atomically at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSession {
    pub dev_eui: DevEui,
    pub dev_addr: DevAddr,
    pub app_s_key: AppSKey,
    pub nwk_s_key: NwkSKey,

    pub f_cnt_up: u32,
    pub f_cnt_down: u32,

    enabled_uplink_channels: BTreeSet<u8>,
    pub dr: u8,
    tx_power_index: u8,
    min_supported_tx_power_index: u8,
    max_supported_tx_power_index: u8,
    pub nb_trans: u8,

    pub rx1_dr_offset: u8,
    pub rx2_data_rate: u8,
    pub rx2_frequency_hz: u32,

    pub ping_slot_frequency_hz: Option<u32>,
    pub ping_slot_data_rate: Option<u8>,

    pub device_class: DeviceClass,

    pending_mac_commands: HashMap<Cid, MacCommandBlock>,

    pub rx_info_set: Vec<RxInfo>,
    pub last_device_status_request_unix: Option<i64>,

    adr_history: VecDeque<AdrHistoryEntry>,
}

impl DeviceSession {
    pub fn new(
        dev_eui: DevEui,
        dev_addr: DevAddr,
        app_s_key: AppSKey,
        nwk_s_key: NwkSKey,
        enabled_uplink_channels: impl IntoIterator<Item = u8>,
    ) -> Self {
        Self {
            dev_eui,
            dev_addr,
            app_s_key,
            nwk_s_key,
            f_cnt_up: 0,
            f_cnt_down: 0,
            enabled_uplink_channels: enabled_uplink_channels.into_iter().collect(),
            dr: 0,
            tx_power_index: 0,
            min_supported_tx_power_index: 0,
            max_supported_tx_power_index: 7,
            nb_trans: 1,
            rx1_dr_offset: 0,
            rx2_data_rate: 0,
            rx2_frequency_hz: 869_525_000,
            ping_slot_frequency_hz: None,
            ping_slot_data_rate: None,
            device_class: DeviceClass::A,
            pending_mac_commands: HashMap::new(),
            rx_info_set: Vec::new(),
            last_device_status_request_unix: None,
            adr_history: VecDeque::with_capacity(ADR_HISTORY_CAPACITY),
        }
    }

    pub fn enabled_uplink_channels(&self) -> &BTreeSet<u8> {
        &self.enabled_uplink_channels
    }

    pub fn set_enabled_uplink_channels(&mut self, channels: impl IntoIterator<Item = u8>) {
        self.enabled_uplink_channels = channels.into_iter().collect();
    }

    pub fn add_enabled_uplink_channel(&mut self, channel: u8) {
        self.enabled_uplink_channels.insert(channel);
    }

    pub fn tx_power_index(&self) -> u8 {
        self.tx_power_index
    }

    /// Sets TXPowerIndex, clamped to `[min_supported, max_supported]` —
    /// the invariant from spec §3 is enforced here rather than trusted to
    /// every call site.
    pub fn set_tx_power_index(&mut self, index: u8) {
        self.tx_power_index =
            index.clamp(self.min_supported_tx_power_index, self.max_supported_tx_power_index);
    }

    pub fn min_supported_tx_power_index(&self) -> u8 {
        self.min_supported_tx_power_index
    }

    pub fn set_min_supported_tx_power_index(&mut self, index: u8) {
        self.min_supported_tx_power_index = index;
        if self.tx_power_index < index {
            self.tx_power_index = index;
        }
    }

    pub fn max_supported_tx_power_index(&self) -> u8 {
        self.max_supported_tx_power_index
    }

    /// Lowers the ceiling only. `tx_power_index` is left as-is even when it
    /// now exceeds `index` — a Power NACK constrains the *next* assignment,
    /// it does not retroactively mute the device's assumed current power.
    pub fn set_max_supported_tx_power_index(&mut self, index: u8) {
        self.max_supported_tx_power_index = index;
    }

    pub fn pending_command(&self, cid: Cid) -> Option<&MacCommandBlock> {
        self.pending_mac_commands.get(&cid)
    }

    /// Sets the pending block for its CID, replacing any earlier one — "at
    /// most one pending block per command identifier" from spec §3.
    pub fn set_pending_command(&mut self, block: MacCommandBlock) {
        self.pending_mac_commands.insert(block.cid(), block);
    }

    pub fn clear_pending_command(&mut self, cid: Cid) {
        self.pending_mac_commands.remove(&cid);
    }

    pub fn record_adr_sample(&mut self, snr: f32, uplink_count: u32) {
        self.adr_history.push_back(AdrHistoryEntry { snr, uplink_count });
        while self.adr_history.len() > ADR_HISTORY_CAPACITY {
            self.adr_history.pop_front();
        }
    }

    pub fn adr_history(&self) -> impl Iterator<Item = &AdrHistoryEntry> {
        self.adr_history.iter()
    }
}
