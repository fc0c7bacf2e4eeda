//! # Uplink Pipeline
//!
//! Per-message-type dispatcher that drives frame-counter and MIC
//! validation, invokes the MAC engine on any MAC payload, and emits an
//! application-delivery record, per spec §4.3's stage order. One struct
//! owning its collaborators and one `run()` entry point mirrors the
//! teacher's device-manager pattern of a context struct with a handful of
//! owned trait-object collaborators and a single dispatch method.

mod fhdr;
mod mac_codec;

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, warn};
use tokio::sync::Mutex;

use crate::backends::{ApplicationBackend, JoinBackend, UplinkMetadata};
use crate::band::BandPlan;
use crate::config::Config;
use crate::constants::MHDR_MTYPE_MASK;
use crate::crypto::{self, Direction};
use crate::dedup::RxPacket;
use crate::downlink::Scheduler;
use crate::error::NsError;
use crate::gateway::GatewayBackend;
use crate::mac::adr::AdrEvaluator;
use crate::mac::commands::{Cid, LinkAdrReq};
use crate::mac::engine::ResponseCommand;
use crate::mac::MacEngine;
use crate::metrics;
use crate::session::model::{DeviceSession, PendingRequest};
use crate::session::store::SessionStore;
use crate::types::DevEui;

pub use fhdr::{parse_data_up, MType, ParsedDataUp};

/// Extends a received 16-bit FCnt into the session's 32-bit counter.
/// Candidate 32-bit values are built from the stored upper 16 bits, tried
/// as-is and incremented by one (covering the 16-bit rollover), and the
/// smallest candidate that is `>= stored` and within `max_gap` of it wins —
/// the "implicit reset convention" flagged as Open Question (c), decided in
/// `DESIGN.md`.
pub fn extend_fcnt(stored: u32, received16: u16, max_gap: u32) -> Option<u32> {
    let fcnt_hi = stored >> 16;
    let candidates = [
        (fcnt_hi << 16) | received16 as u32,
        (fcnt_hi.wrapping_add(1) << 16) | received16 as u32,
    ];
    candidates
        .into_iter()
        .filter(|c| *c > stored && c.wrapping_sub(stored) <= max_gap)
        .min()
}

/// Drives uplink handling end to end for one deduplicated `RxPacket`.
pub struct UplinkPipeline<S: SessionStore, A: ApplicationBackend, J: JoinBackend, G: GatewayBackend> {
    store: Arc<S>,
    application: Arc<A>,
    join_backend: Arc<J>,
    scheduler: Arc<Scheduler<S, G>>,
    mac_engine: MacEngine,
    config: Config,
    adr_evaluators: Mutex<HashMap<DevEui, Box<dyn AdrEvaluator>>>,
}

impl<S: SessionStore, A: ApplicationBackend, J: JoinBackend, G: GatewayBackend> UplinkPipeline<S, A, J, G> {
    pub fn new(
        store: Arc<S>,
        application: Arc<A>,
        join_backend: Arc<J>,
        scheduler: Arc<Scheduler<S, G>>,
        band: Arc<dyn BandPlan>,
        config: Config,
    ) -> Self {
        Self {
            store,
            application,
            join_backend,
            scheduler,
            mac_engine: MacEngine::new(band),
            config,
            adr_evaluators: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatches by MType, per spec §4.3.
    pub async fn handle(&self, packet: RxPacket) -> Result<(), NsError> {
        let mtype = match packet.phy_payload.first() {
            Some(b) => MType::from_mhdr(*b),
            None => return Err(NsError::BadArgument("empty PHY payload".into())),
        };

        match mtype {
            MType::JoinRequest => self.handle_join_request(&packet).await,
            MType::RejoinRequest => {
                debug!("rejoin request received, not yet negotiated on this uplink");
                Ok(())
            }
            MType::UnconfirmedDataUp | MType::ConfirmedDataUp => {
                let confirmed = mtype == MType::ConfirmedDataUp;
                self.handle_data_up(&packet, confirmed).await
            }
            MType::Proprietary => {
                debug!("proprietary uplink dropped, no handler registered");
                Ok(())
            }
            MType::Other(b) => Err(NsError::BadArgument(format!("unexpected uplink mtype {b:#x}"))),
        }
    }

    async fn handle_join_request(&self, packet: &RxPacket) -> Result<(), NsError> {
        if packet.phy_payload.len() < 1 + 8 + 8 + 2 {
            return Err(NsError::BadArgument("join request too short".into()));
        }
        let join_eui = crate::types::JoinEui(packet.phy_payload[1..9].try_into().unwrap());
        let dev_eui = DevEui(packet.phy_payload[9..17].try_into().unwrap());
        let dev_nonce = u16::from_le_bytes([packet.phy_payload[17], packet.phy_payload[18]]);

        let accept = self.join_backend.join_request(join_eui, dev_eui, dev_nonce).await?;

        let session = DeviceSession::new(dev_eui, accept.dev_addr, accept.app_s_key, accept.nwk_s_key, [0u8, 1, 2]);

        let candidates = self.scheduler.build_candidates(
            &session,
            &packet.rx_info_set[0],
            &packet.tx_info,
            accept.encoded_phy_payload,
            true,
            0,
        );

        self.store.save_session(session, self.config.inactivity_ttl).await?;
        self.scheduler.schedule(dev_eui, candidates).await
    }

    async fn handle_data_up(&self, packet: &RxPacket, confirmed: bool) -> Result<(), NsError> {
        let parsed = match parse_data_up(&packet.phy_payload) {
            Ok(p) => p,
            Err(e) => {
                debug!("data-up parse failed: {e}");
                return Ok(());
            }
        };

        let candidate_sessions = self.store.get_sessions_for_dev_addr(parsed.dev_addr).await?;
        let mut matched = None;
        for session in candidate_sessions {
            let fcnt32 = match extend_fcnt(session.f_cnt_up, parsed.fcnt16, self.config.max_fcnt_gap) {
                Some(v) => v,
                None => continue,
            };
            let valid = crypto::verify_data_mic(
                &session.nwk_s_key,
                session.dev_addr,
                Direction::Up,
                fcnt32,
                &parsed.mic_input,
                parsed.mic,
            )
            .unwrap_or(false);
            if valid {
                matched = Some((session, fcnt32));
                break;
            }
        }

        let (mut session, fcnt32) = match matched {
            Some(m) => m,
            None => {
                debug!("data-up dropped: no session produced a valid MIC for dev_addr={}", parsed.dev_addr);
                metrics::record_error(&parsed.dev_addr.to_hex(), &NsError::Replay);
                return Ok(());
            }
        };

        session.f_cnt_up = fcnt32;
        session.rx_info_set = packet.rx_info_set.clone();

        let best_snr = packet.rx_info_set.iter().map(|r| r.lora_snr).fold(f64::NEG_INFINITY, f64::max);
        if best_snr.is_finite() {
            let mut evaluators = self.adr_evaluators.lock().await;
            evaluators
                .entry(session.dev_eui)
                .or_insert_with(|| Box::new(crate::mac::adr::AdrController::new()))
                .record_uplink(best_snr as f32);
        }

        let frm_payload = if parsed.f_port.map(|p| p > 0).unwrap_or(false) {
            crypto::crypt_payload(&session.app_s_key, session.dev_addr, Direction::Up, fcnt32, &parsed.frm_payload)
        } else {
            crypto::crypt_payload(&session.nwk_s_key, session.dev_addr, Direction::Up, fcnt32, &parsed.frm_payload)
        };

        // A MAC parse error means this uplink's MAC command block is
        // untrustworthy: per SPEC_FULL.md §4.3's failure contract, the
        // application payload is still delivered below, but the MAC engine
        // is not run and no downlink MAC answer is emitted for it.
        let uplink_commands = match mac_codec::decode_uplink_commands(&parsed.fopts, parsed.f_port, &frm_payload) {
            Ok(cmds) => Some(cmds),
            Err(e) => {
                warn!("mac command parse error for dev_eui={}: {e}", session.dev_eui);
                None
            }
        };

        let response_commands = match uplink_commands {
            Some(uplink_commands) => {
                let server_requests = self.pending_adr_request(&mut session).await;
                match self.mac_engine.handle(&mut session, &packet.rx_info_set, &uplink_commands, server_requests) {
                    Ok(resp) => resp,
                    Err(e) => {
                        warn!("mac engine error for dev_eui={}: {e}", session.dev_eui);
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };

        if parsed.f_port.map(|p| p > 0).unwrap_or(false) {
            let meta = UplinkMetadata { dev_eui: session.dev_eui, f_port: parsed.f_port.unwrap(), f_cnt: fcnt32 };
            match self.application.handle_uplink_data(&frm_payload, meta).await {
                Ok(()) => metrics::record_uplink_delivered(&session.dev_eui.to_hex()),
                Err(e) => {
                    warn!("application delivery failed for dev_eui={}: {e}", session.dev_eui);
                    metrics::record_error(&session.dev_eui.to_hex(), &e);
                }
            }
        }

        self.store.save_session(session.clone(), self.config.inactivity_ttl).await?;

        if confirmed || !response_commands.is_empty() {
            let downlink_payload = mac_codec::encode_mac_answer_fport(&response_commands);
            let candidates = self.scheduler.build_candidates(
                &session,
                &packet.rx_info_set[0],
                &packet.tx_info,
                downlink_payload,
                false,
                fcnt32 as u64,
            );
            self.scheduler.schedule(session.dev_eui, candidates).await?;
        }

        Ok(())
    }

    /// Asks the device's ADR evaluator whether a `LinkADRReq` should be
    /// queued this uplink. Returns an empty vec when ADR has nothing to say
    /// (not enough history, no change recommended).
    async fn pending_adr_request(&self, session: &mut DeviceSession) -> Vec<PendingRequest> {
        let mut evaluators = self.adr_evaluators.lock().await;
        let evaluator = match evaluators.get_mut(&session.dev_eui) {
            Some(e) => e,
            None => return Vec::new(),
        };
        match evaluator.evaluate(session.dr, session.tx_power_index()) {
            Some(decision) => {
                let ch_mask = channel_mask(session);
                vec![PendingRequest::LinkAdr(LinkAdrReq {
                    ch_mask,
                    data_rate: decision.data_rate,
                    tx_power: decision.tx_power_index,
                    nb_rep: decision.nb_trans,
                })]
            }
            None => Vec::new(),
        }
    }
}

fn channel_mask(session: &DeviceSession) -> Vec<bool> {
    let max_channel = session.enabled_uplink_channels().iter().copied().max().unwrap_or(0);
    (0..=max_channel).map(|ch| session.enabled_uplink_channels().contains(&ch)).collect()
}

#[allow(dead_code)]
fn response_command_cid(cmd: &ResponseCommand) -> Cid {
    match cmd {
        ResponseCommand::LinkAdrReq(_) => Cid::LinkAdr,
        ResponseCommand::PingSlotChannelReq(_) => Cid::PingSlotChannel,
        ResponseCommand::RxParamSetupReq(_) => Cid::RxParamSetup,
        ResponseCommand::NewChannelReq(_) => Cid::NewChannel,
        ResponseCommand::DevStatusReq => Cid::DevStatus,
        ResponseCommand::DeviceTimeAns(_) => Cid::DeviceTime,
        ResponseCommand::LinkCheckAns(_) => Cid::LinkCheck,
    }
}
