//! The pending/answer reconciliation protocol against the device session,
//! per spec §4.2's transition table. One method per CID, dispatched from
//! `handle()`, mirrors the teacher's per-VIF-type decoder functions called
//! from one top-level `decode()` match.

use std::sync::Arc;

use log::debug;

use crate::band::{demod_floor_dbm, BandPlan};
use crate::constants::GPS_EPOCH_UNIX_SECS;
use crate::error::NsError;
use crate::mac::commands::{
    Cid, DevStatusAns, DeviceTimeAns, LinkAdrAns, LinkCheckAns, NewChannelAns, PingSlotChannelAns,
    RxParamSetupAns,
};
use crate::session::model::{DeviceSession, MacCommandBlock, PendingRequest};
use crate::types::RxInfo;

/// One MAC command carried in an uplink's FOpts/FRMPayload, already parsed
/// into its answer or unsolicited-request payload.
#[derive(Debug, Clone)]
pub enum UplinkMacCommand {
    LinkAdrAns(LinkAdrAns),
    PingSlotChannelAns(PingSlotChannelAns),
    RxParamSetupAns(RxParamSetupAns),
    NewChannelAns(NewChannelAns),
    DevStatusAns(DevStatusAns),
    DeviceTimeReq,
    LinkCheckReq,
}

/// One MAC command the engine wants carried in the next downlink, either a
/// server-initiated request or an answer to a device-initiated request.
#[derive(Debug, Clone)]
pub enum ResponseCommand {
    LinkAdrReq(crate::mac::commands::LinkAdrReq),
    PingSlotChannelReq(crate::mac::commands::PingSlotChannelReq),
    RxParamSetupReq(crate::mac::commands::RxParamSetupReq),
    NewChannelReq(crate::mac::commands::NewChannelReq),
    /// `DevStatusReq` carries no payload.
    DevStatusReq,
    DeviceTimeAns(DeviceTimeAns),
    LinkCheckAns(LinkCheckAns),
}

/// Catalog of command handlers plus the pending/answer reconciliation
/// protocol. Holds only the band plan, since that is the one piece of
/// external state every CID handler might need (channel validation,
/// demodulation floors); everything else comes from the session and the
/// call arguments.
pub struct MacEngine {
    band: Arc<dyn BandPlan>,
}

impl MacEngine {
    pub fn new(band: Arc<dyn BandPlan>) -> Self {
        Self { band }
    }

    /// `Handle(session, uplinkContext, answerBlock, pendingBlock)` from
    /// spec §4.2. `server_requests` are the CID-specific requests a policy
    /// layer (e.g. the ADR evaluator) decided to queue for this uplink;
    /// they are stored as the new pending block for their CID and echoed
    /// back as response commands for the caller to place in FOpts/FRMPayload.
    pub fn handle(
        &self,
        session: &mut DeviceSession,
        rx_info_set: &[RxInfo],
        uplink_commands: &[UplinkMacCommand],
        server_requests: Vec<PendingRequest>,
    ) -> Result<Vec<ResponseCommand>, NsError> {
        let mut responses = Vec::new();

        for req in server_requests {
            responses.push(request_to_response(&req));
            session.set_pending_command(
                MacCommandBlock::new(vec![req]).expect("single-request block is always valid"),
            );
        }

        for cmd in uplink_commands {
            match cmd {
                UplinkMacCommand::LinkAdrAns(ans) => self.handle_link_adr_ans(session, *ans)?,
                UplinkMacCommand::PingSlotChannelAns(ans) => {
                    self.handle_ping_slot_channel_ans(session, *ans)?
                }
                UplinkMacCommand::RxParamSetupAns(ans) => {
                    self.handle_rx_param_setup_ans(session, *ans)?
                }
                UplinkMacCommand::NewChannelAns(ans) => self.handle_new_channel_ans(session, *ans)?,
                UplinkMacCommand::DevStatusAns(ans) => self.handle_dev_status_ans(session, *ans)?,
                UplinkMacCommand::DeviceTimeReq => {
                    responses.push(ResponseCommand::DeviceTimeAns(self.device_time_ans()));
                }
                UplinkMacCommand::LinkCheckReq => {
                    responses
                        .push(ResponseCommand::LinkCheckAns(self.link_check_ans(rx_info_set, session.dr)));
                }
            }
        }

        Ok(responses)
    }

    fn pending_or_not_found(
        &self,
        session: &DeviceSession,
        cid: Cid,
    ) -> Result<MacCommandBlock, NsError> {
        session
            .pending_command(cid)
            .cloned()
            .ok_or_else(|| NsError::NotFound("expected pending mac-command".into()))
    }

    fn handle_link_adr_ans(&self, session: &mut DeviceSession, ans: LinkAdrAns) -> Result<(), NsError> {
        let block = self.pending_or_not_found(session, Cid::LinkAdr)?;
        let req = match &block.requests()[0] {
            PendingRequest::LinkAdr(r) => r.clone(),
            _ => unreachable!("block invariant guarantees homogeneous CID"),
        };

        if ans.channel_mask_ack && ans.data_rate_ack && ans.power_ack {
            session.set_enabled_uplink_channels(chmask_channels(&req.ch_mask));
            session.dr = req.data_rate;
            session.set_tx_power_index(req.tx_power);
            if req.nb_rep > 0 {
                session.nb_trans = req.nb_rep;
            }
        } else {
            if ans.channel_mask_ack {
                session.set_enabled_uplink_channels(chmask_channels(&req.ch_mask));
            }
            if ans.data_rate_ack {
                session.dr = req.data_rate;
            }
            if ans.power_ack {
                session.set_tx_power_index(req.tx_power);
            } else if session.tx_power_index() > 0 {
                let floor = session.tx_power_index() - 1;
                session.set_max_supported_tx_power_index(floor);
            } else {
                session.set_min_supported_tx_power_index(1);
                session.set_tx_power_index(1);
            }
        }

        session.clear_pending_command(Cid::LinkAdr);
        Ok(())
    }

    fn handle_ping_slot_channel_ans(
        &self,
        session: &mut DeviceSession,
        ans: PingSlotChannelAns,
    ) -> Result<(), NsError> {
        let block = self.pending_or_not_found(session, Cid::PingSlotChannel)?;
        let req = match &block.requests()[0] {
            PendingRequest::PingSlotChannel(r) => *r,
            _ => unreachable!("block invariant guarantees homogeneous CID"),
        };

        // Open Question (a), decided in DESIGN.md: a single false ack bit
        // rejects the whole request — no partial field adoption.
        if ans.data_rate_ok && ans.channel_frequency_ok {
            session.ping_slot_frequency_hz = Some(req.frequency_hz);
            session.ping_slot_data_rate = Some(req.data_rate);
        } else {
            debug!("ping_slot_channel_ans: nacked, leaving session unchanged");
        }

        session.clear_pending_command(Cid::PingSlotChannel);
        Ok(())
    }

    fn handle_rx_param_setup_ans(
        &self,
        session: &mut DeviceSession,
        ans: RxParamSetupAns,
    ) -> Result<(), NsError> {
        let block = self.pending_or_not_found(session, Cid::RxParamSetup)?;
        let req = match &block.requests()[0] {
            PendingRequest::RxParamSetup(r) => *r,
            _ => unreachable!("block invariant guarantees homogeneous CID"),
        };

        if ans.all_ok() {
            session.rx1_dr_offset = req.rx1_dr_offset;
            session.rx2_data_rate = req.rx2_data_rate;
            session.rx2_frequency_hz = req.rx2_frequency_hz;
        }

        session.clear_pending_command(Cid::RxParamSetup);
        Ok(())
    }

    fn handle_new_channel_ans(&self, session: &mut DeviceSession, ans: NewChannelAns) -> Result<(), NsError> {
        let block = self.pending_or_not_found(session, Cid::NewChannel)?;
        let req = match &block.requests()[0] {
            PendingRequest::NewChannel(r) => *r,
            _ => unreachable!("block invariant guarantees homogeneous CID"),
        };

        if ans.frequency_ok && ans.data_rate_range_ok {
            session.add_enabled_uplink_channel(req.ch_index);
        }

        session.clear_pending_command(Cid::NewChannel);
        Ok(())
    }

    fn handle_dev_status_ans(&self, session: &mut DeviceSession, ans: DevStatusAns) -> Result<(), NsError> {
        self.pending_or_not_found(session, Cid::DevStatus)?;
        debug!("dev_status_ans: battery={} margin={}", ans.battery, ans.margin);
        session.clear_pending_command(Cid::DevStatus);
        Ok(())
    }

    fn device_time_ans(&self) -> DeviceTimeAns {
        let now_unix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(GPS_EPOCH_UNIX_SECS);
        let seconds_since_gps_epoch = (now_unix - GPS_EPOCH_UNIX_SECS).max(0) as u32;
        DeviceTimeAns { seconds_since_gps_epoch, fractional_second: 0 }
    }

    fn link_check_ans(&self, rx_info_set: &[RxInfo], current_dr: u8) -> LinkCheckAns {
        let best_snr =
            rx_info_set.iter().map(|rx| rx.lora_snr).fold(f64::NEG_INFINITY, f64::max);
        let spreading_factor = match self.band.data_rate(current_dr) {
            Some(crate::types::DataRate::Lora { spreading_factor, .. }) => spreading_factor,
            _ => 12,
        };
        let floor = demod_floor_dbm(spreading_factor);
        let margin_db = (best_snr - floor as f64).round() as i32;
        LinkCheckAns { margin_db, gateway_count: rx_info_set.len() as u8 }
    }
}

fn chmask_channels(ch_mask: &[bool]) -> Vec<u8> {
    ch_mask
        .iter()
        .enumerate()
        .filter_map(|(i, enabled)| enabled.then_some(i as u8))
        .collect()
}

fn request_to_response(req: &PendingRequest) -> ResponseCommand {
    match req {
        PendingRequest::LinkAdr(r) => ResponseCommand::LinkAdrReq(r.clone()),
        PendingRequest::PingSlotChannel(r) => ResponseCommand::PingSlotChannelReq(*r),
        PendingRequest::RxParamSetup(r) => ResponseCommand::RxParamSetupReq(*r),
        PendingRequest::NewChannel(r) => ResponseCommand::NewChannelReq(*r),
        PendingRequest::DevStatus => ResponseCommand::DevStatusReq,
    }
}
