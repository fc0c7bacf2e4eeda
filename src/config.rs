//! # Configuration
//!
//! A plain struct built once at setup and threaded through constructors —
//! not read from hidden globals, per `SPEC_FULL.md` §9's "global
//! configuration is injected once" design note. Fields per spec §6 plus the
//! MAC engine's max FCnt gap and inactivity TTL from §3/§6.

use std::time::Duration;

use crate::constants::{
    DEFAULT_DEDUPLICATION_DELAY_MS, DEFAULT_JOIN_ACCEPT_DELAY1_SECS, DEFAULT_JOIN_ACCEPT_DELAY2_SECS,
    DEFAULT_MAX_FCNT_GAP, DEFAULT_RX1_DELAY_SECS, RX2_DELAY_OFFSET_SECS,
};

/// Which RX window(s) the scheduler is allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxWindowPolicy {
    Both,
    Rx1Only,
    Rx2Only,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub deduplication_delay: Duration,
    pub rx_window: RxWindowPolicy,
    /// dBm; `None` means "use band default".
    pub downlink_tx_power_dbm: Option<i8>,
    pub get_downlink_data_delay: Duration,
    pub band_plan_name: String,
    pub session_ttl: Duration,
    pub max_fcnt_gap: u32,
    pub inactivity_ttl: Duration,
    pub rx1_delay: Duration,
    pub join_accept_delay1: Duration,
    pub join_accept_delay2: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let rx1_delay = Duration::from_secs(DEFAULT_RX1_DELAY_SECS);
        Self {
            deduplication_delay: Duration::from_millis(DEFAULT_DEDUPLICATION_DELAY_MS),
            rx_window: RxWindowPolicy::Both,
            downlink_tx_power_dbm: None,
            get_downlink_data_delay: Duration::from_secs(1),
            band_plan_name: "EU868".to_string(),
            session_ttl: Duration::from_secs(24 * 3600),
            max_fcnt_gap: DEFAULT_MAX_FCNT_GAP,
            inactivity_ttl: Duration::from_secs(30 * 24 * 3600),
            rx1_delay,
            join_accept_delay1: Duration::from_secs(DEFAULT_JOIN_ACCEPT_DELAY1_SECS),
            join_accept_delay2: Duration::from_secs(DEFAULT_JOIN_ACCEPT_DELAY2_SECS),
        }
    }
}

impl Config {
    /// RX2 delay is always RX1 delay + 1 second, per the LoRaWAN MAC spec —
    /// derived rather than independently configurable.
    pub fn rx2_delay(&self) -> Duration {
        self.rx1_delay + Duration::from_secs(RX2_DELAY_OFFSET_SECS)
    }
}
