//! # Adaptive Data Rate Evaluator
//!
//! The ADR algorithm itself — history window, step-up/step-down thresholds —
//! is out of scope for the network-server core; it is an input collaborator
//! the MAC engine calls into (Open Question (b), decided in `DESIGN.md`).
//! `AdrEvaluator` is that collaborator's contract. Because the teacher
//! crate's own `lora::adr::AdrController` is a complete, working ADR
//! algorithm — SNR history, hysteresis against oscillation, packet-loss
//! back-off — it is adapted here as the one reference implementation behind
//! the trait, retargeted from raw spreading-factor/dBm values to the
//! LoRaWAN DR-index/TXPower-index scale the MAC engine actually negotiates.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

/// Collaborator the MAC engine consults when deciding whether to queue a
/// `LinkADRReq` for a device. Kept deliberately narrow: record observed
/// link quality, then ask for a decision.
pub trait AdrEvaluator: Send + Sync {
    /// Record one uplink's SNR for the rolling history.
    fn record_uplink(&mut self, snr: f32);

    /// Record a missed uplink (a gap in the frame counter sequence).
    fn record_loss(&mut self);

    /// Evaluate whether the session's DR/TXPower should change, given its
    /// current values. Returns `None` when no change is recommended or not
    /// enough history has accumulated yet.
    fn evaluate(&mut self, current_dr: u8, current_tx_power_index: u8) -> Option<AdrDecision>;
}

/// Recommended DR/TXPower-index pair plus the rationale, consumed by the
/// engine to build a `LinkADRReq`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdrDecision {
    pub data_rate: u8,
    pub tx_power_index: u8,
    pub nb_trans: u8,
    pub reason: AdrReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdrReason {
    SignalImproved,
    SignalDegraded,
    PacketLoss,
}

#[derive(Debug, Clone, Copy)]
struct SnrSample {
    snr: f32,
    #[allow(dead_code)]
    at: Instant,
}

/// SNR-to-DR margin table: SNR required at each DR index to meet the
/// standard LoRaWAN demodulation floor plus a safety margin, EU868 scale
/// (DR0=SF12 .. DR5=SF7, DR6 fixed SF7/250kHz excluded from ADR step-up).
const SNR_STEP_UP_DB: [f32; 6] = [-20.0, -17.5, -15.0, -12.5, -10.0, -7.5];

/// Number of consecutive uplink losses that force a step-down regardless of
/// the evaluation interval.
const LOSS_TRIGGER: u32 = 3;

/// ADR controller adapted from the teacher crate's spreading-factor
/// controller, operating on DR index (0..=5, ADR never raises a device past
/// DR5 in this implementation — DR6/DR7 are left to manual configuration)
/// and TXPower index (0..=7, 0 = maximum power).
pub struct AdrController {
    history: VecDeque<SnrSample>,
    averaging_window: usize,
    hysteresis_db: f32,
    consecutive_losses: u32,
    last_evaluation: Instant,
    evaluation_interval: Duration,
}

impl Default for AdrController {
    fn default() -> Self {
        Self::new()
    }
}

impl AdrController {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(20),
            averaging_window: 20,
            hysteresis_db: 3.0,
            consecutive_losses: 0,
            last_evaluation: Instant::now(),
            evaluation_interval: Duration::from_secs(30),
        }
    }

    fn average_snr(&self) -> f32 {
        if self.history.is_empty() {
            return -20.0;
        }
        self.history.iter().map(|s| s.snr).sum::<f32>() / self.history.len() as f32
    }

    fn optimal_dr(&self, avg_snr: f32) -> u8 {
        SNR_STEP_UP_DB
            .iter()
            .enumerate()
            .rev()
            .find(|(_, threshold)| avg_snr >= **threshold)
            .map(|(dr, _)| dr as u8)
            .unwrap_or(0)
    }

    fn apply_hysteresis(&self, current_dr: u8, target_dr: u8, avg_snr: f32) -> u8 {
        if target_dr > current_dr {
            let threshold = SNR_STEP_UP_DB.get(target_dr as usize).copied().unwrap_or(0.0);
            if avg_snr > threshold + self.hysteresis_db {
                target_dr
            } else {
                current_dr
            }
        } else {
            target_dr
        }
    }
}

impl AdrEvaluator for AdrController {
    fn record_uplink(&mut self, snr: f32) {
        self.history.push_back(SnrSample { snr, at: Instant::now() });
        while self.history.len() > self.averaging_window {
            self.history.pop_front();
        }
        self.consecutive_losses = 0;
        debug!("adr: recorded uplink snr={snr}");
    }

    fn record_loss(&mut self) {
        self.consecutive_losses += 1;
        warn!("adr: uplink loss recorded (consecutive={})", self.consecutive_losses);
    }

    fn evaluate(&mut self, current_dr: u8, current_tx_power_index: u8) -> Option<AdrDecision> {
        if self.consecutive_losses >= LOSS_TRIGGER {
            self.consecutive_losses = 0;
            self.last_evaluation = Instant::now();
            let new_dr = current_dr.saturating_sub(1);
            let new_power = current_tx_power_index.saturating_sub(1);
            info!("adr: packet-loss back-off dr={current_dr}->{new_dr} power_index={current_tx_power_index}->{new_power}");
            return Some(AdrDecision {
                data_rate: new_dr,
                tx_power_index: new_power,
                nb_trans: 1,
                reason: AdrReason::PacketLoss,
            });
        }

        if self.last_evaluation.elapsed() < self.evaluation_interval {
            return None;
        }
        if self.history.len() < 5 {
            return None;
        }
        self.last_evaluation = Instant::now();

        let avg_snr = self.average_snr();
        let optimal = self.optimal_dr(avg_snr);
        let target_dr = self.apply_hysteresis(current_dr, optimal, avg_snr);

        if target_dr == current_dr {
            return None;
        }

        let reason = if target_dr > current_dr {
            AdrReason::SignalImproved
        } else {
            AdrReason::SignalDegraded
        };
        let tx_power_index = if reason == AdrReason::SignalImproved {
            (current_tx_power_index + 1).min(7)
        } else {
            current_tx_power_index.saturating_sub(1)
        };

        info!(
            "adr: dr {current_dr}->{target_dr} power_index {current_tx_power_index}->{tx_power_index} (avg_snr={avg_snr:.1})"
        );

        Some(AdrDecision { data_rate: target_dr, tx_power_index, nb_trans: 1, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_up_on_strong_signal() {
        let mut adr = AdrController::new();
        adr.evaluation_interval = Duration::from_millis(0);
        for _ in 0..10 {
            adr.record_uplink(10.0);
        }
        let decision = adr.evaluate(0, 0).expect("should recommend a step-up");
        assert_eq!(decision.reason, AdrReason::SignalImproved);
        assert!(decision.data_rate > 0);
    }

    #[test]
    fn hysteresis_blocks_marginal_step_up() {
        let mut adr = AdrController::new();
        adr.evaluation_interval = Duration::from_millis(0);
        // Just above the DR1 threshold (-17.5) but under the +3dB hysteresis margin.
        for _ in 0..10 {
            adr.record_uplink(-16.0);
        }
        let decision = adr.evaluate(0, 0);
        assert!(decision.is_none());
    }

    #[test]
    fn consecutive_losses_force_back_off() {
        let mut adr = AdrController::new();
        adr.record_loss();
        adr.record_loss();
        let decision = adr.evaluate(3, 2);
        assert!(decision.is_none());
        adr.record_loss();
        let decision = adr.evaluate(3, 2).expect("third loss forces back-off");
        assert_eq!(decision.reason, AdrReason::PacketLoss);
        assert_eq!(decision.data_rate, 2);
        assert_eq!(decision.tx_power_index, 1);
    }
}
