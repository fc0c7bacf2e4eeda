//! # Deduplicator
//!
//! Time-windowed collector that merges N gateway copies of one uplink into
//! one logical reception with an aggregated RX-info set. Grounded on the
//! same `Arc<Mutex<Inner>>` handle split the teacher uses for its cache,
//! plus a tracked `tokio::time::sleep` per fingerprint standing in for the
//! teacher's nonexistent-but-idiomatic "schedule a timer" step — the
//! teacher's async code already reaches for `tokio::spawn` background tasks
//! wherever a deferred action is needed (see `wmbus::handle`). The
//! completion timer, and the caller's completion work it runs, are both
//! spawned through a shared [`WaitGroup`] rather than a bare `tokio::spawn`,
//! so `NetworkServer::shutdown` can wait for them instead of abandoning
//! them. Each gateway copy is registered via the Session Store's atomic
//! `list_append`, not a separate `get` plus `put`, so two gateway copies
//! arriving within the same tick can't race and overwrite each other's
//! membership entry.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::error::NsError;
use crate::session::keys;
use crate::session::store::SessionStore;
use crate::types::{DevAddr, RxInfo, TxInfo};
use crate::util::WaitGroup;

/// One gateway's copy of an uplink, as handed to the deduplicator.
#[derive(Debug, Clone)]
pub struct GatewayUplink {
    pub phy_payload: Vec<u8>,
    pub dev_addr: Option<DevAddr>,
    pub rx_info: RxInfo,
    pub tx_info: TxInfo,
}

/// One logical uplink after deduplication: the decoded PHY payload, the
/// aggregated RX-info set, and one canonical TX-info block.
#[derive(Debug, Clone)]
pub struct RxPacket {
    pub phy_payload: Vec<u8>,
    pub rx_info_set: Vec<RxInfo>,
    pub tx_info: TxInfo,
}

/// Computes the dedup fingerprint: PHY payload bytes plus DevAddr when
/// present, hashed with `DefaultHasher` — a dedup key, not a security
/// boundary, so a non-cryptographic hash is sufficient.
fn fingerprint(payload: &[u8], dev_addr: Option<DevAddr>) -> u64 {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    dev_addr.map(|a| a.0).hash(&mut hasher);
    hasher.finish()
}

/// Picks the canonical member by the tie-break rule of spec §4.1: highest
/// SNR, then highest RSSI, then smallest gateway id lexicographically.
fn pick_canonical(members: &[GatewayUplink]) -> usize {
    let mut best = 0;
    for (i, m) in members.iter().enumerate().skip(1) {
        let b = &members[best];
        let better = match m.rx_info.lora_snr.partial_cmp(&b.rx_info.lora_snr) {
            Some(std::cmp::Ordering::Greater) => true,
            Some(std::cmp::Ordering::Equal) => match m.rx_info.rssi.cmp(&b.rx_info.rssi) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Equal => m.rx_info.gateway_id.0 < b.rx_info.gateway_id.0,
                std::cmp::Ordering::Less => false,
            },
            _ => false,
        };
        if better {
            best = i;
        }
    }
    best
}

/// Collects gateway copies of uplinks under a fingerprint and invokes a
/// completion callback exactly once per fingerprint per window.
pub struct Deduplicator<S: SessionStore> {
    store: Arc<S>,
    deduplication_delay: Duration,
    set_ttl: Duration,
    wait_group: WaitGroup,
}

impl<S: SessionStore + 'static> Deduplicator<S> {
    pub fn new(store: Arc<S>, deduplication_delay: Duration, wait_group: WaitGroup) -> Self {
        Self { store, deduplication_delay, set_ttl: deduplication_delay + Duration::from_secs(2), wait_group }
    }

    /// `Collect(uplink, onComplete)` from spec §4.1. Registers `uplink`
    /// under its fingerprint; on the first arrival, schedules the
    /// completion timer and stores the member list in the Session Store so
    /// later members (and a second server instance) can join the same
    /// window. `on_complete` returns the future that does the actual
    /// completion work (typically running the uplink pipeline); it is
    /// awaited inside the same tracked task as the timer, not spawned again.
    pub async fn collect<F, Fut>(&self, uplink: GatewayUplink, on_complete: F) -> Result<(), NsError>
    where
        F: FnOnce(RxPacket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fp = fingerprint(&uplink.phy_payload, uplink.dev_addr);
        let set_key = keys::dedup_set(fp);
        let member_key = member_key(&uplink);

        let member_bytes = encode_member(&uplink);
        self.store.list_append(&member_list_key(&set_key), member_bytes, self.set_ttl).await?;

        let newly_scheduled = self.store.set_add(&set_key, "scheduled".to_string(), self.set_ttl).await?;
        if !newly_scheduled {
            debug!("dedup: fingerprint {fp:016x} joined existing window (member={member_key})");
            return Ok(());
        }

        let store = self.store.clone();
        let delay = self.deduplication_delay;
        let set_key_for_timer = set_key.clone();
        let member_list = member_list_key(&set_key);

        self.wait_group.spawn(async move {
            tokio::time::sleep(delay).await;

            let claimed = match store.set_add(&set_key_for_timer, "completed".to_string(), Duration::from_secs(30)).await {
                Ok(claimed) => claimed,
                Err(_) => return,
            };
            if !claimed {
                debug!("dedup: completion for {fp:016x} already claimed, dropping");
                return;
            }

            let members = match store.list_members(&member_list).await {
                Ok(bytes) => decode_members(bytes),
                Err(_) => return,
            };
            if members.is_empty() {
                return;
            }

            let canonical = pick_canonical(&members);
            let packet = RxPacket {
                phy_payload: members[canonical].phy_payload.clone(),
                rx_info_set: members.iter().map(|m| m.rx_info.clone()).collect(),
                tx_info: members[canonical].tx_info.clone(),
            };
            on_complete(packet).await;
        });

        Ok(())
    }
}

fn member_key(uplink: &GatewayUplink) -> String {
    uplink.rx_info.gateway_id.to_hex()
}

fn member_list_key(set_key: &str) -> String {
    format!("{set_key}:members")
}

fn encode_member(uplink: &GatewayUplink) -> Vec<u8> {
    serde_json::to_vec(&SerializableUplink::from(uplink)).unwrap_or_default()
}

fn decode_members(entries: Vec<Vec<u8>>) -> Vec<GatewayUplink> {
    entries
        .into_iter()
        .filter_map(|bytes| serde_json::from_slice::<SerializableUplink>(&bytes).ok())
        .map(Into::into)
        .collect()
}

/// Serde-friendly mirror of `GatewayUplink`, kept separate so the public
/// type can stay free of derive requirements unrelated to its purpose.
#[derive(serde::Serialize, serde::Deserialize)]
struct SerializableUplink {
    phy_payload: Vec<u8>,
    dev_addr: Option<u32>,
    rx_info: RxInfo,
    tx_info: TxInfo,
}

impl From<&GatewayUplink> for SerializableUplink {
    fn from(u: &GatewayUplink) -> Self {
        Self {
            phy_payload: u.phy_payload.clone(),
            dev_addr: u.dev_addr.map(|a| a.0),
            rx_info: u.rx_info.clone(),
            tx_info: u.tx_info.clone(),
        }
    }
}

impl From<SerializableUplink> for GatewayUplink {
    fn from(u: SerializableUplink) -> Self {
        Self {
            phy_payload: u.phy_payload,
            dev_addr: u.dev_addr.map(DevAddr),
            rx_info: u.rx_info,
            tx_info: u.tx_info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::InMemorySessionStore;
    use crate::types::{DataRate, GatewayId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn uplink(gateway_byte: u8, rssi: i32, snr: f64) -> GatewayUplink {
        GatewayUplink {
            phy_payload: vec![1, 2, 3],
            dev_addr: Some(DevAddr(42)),
            rx_info: RxInfo {
                gateway_id: GatewayId([gateway_byte; 8]),
                rssi,
                lora_snr: snr,
                board: 0,
                antenna: 0,
                context: Vec::new(),
            },
            tx_info: TxInfo { frequency_hz: 868_100_000, data_rate: DataRate::Lora { spreading_factor: 7, bandwidth_khz: 125 } },
        }
    }

    #[tokio::test]
    async fn two_gateway_copies_complete_exactly_once() {
        let store = Arc::new(InMemorySessionStore::new());
        let dedup = Deduplicator::new(store, Duration::from_millis(30), WaitGroup::new());

        let completions = Arc::new(AtomicUsize::new(0));
        let rx_info_counts = Arc::new(std::sync::Mutex::new(Vec::new()));

        let c1 = completions.clone();
        let r1 = rx_info_counts.clone();
        dedup
            .collect(uplink(1, -80, 5.0), move |packet| {
                c1.fetch_add(1, Ordering::SeqCst);
                r1.lock().unwrap().push(packet.rx_info_set.len());
                async {}
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        dedup.collect(uplink(2, -70, 8.0), |_| async {}).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(rx_info_counts.lock().unwrap()[0], 2);
    }

    #[test]
    fn canonical_pick_prefers_highest_snr() {
        let members = vec![uplink(1, -80, 5.0), uplink(2, -70, 8.0)];
        assert_eq!(pick_canonical(&members), 1);
    }

    #[test]
    fn canonical_pick_breaks_snr_tie_on_rssi() {
        let members = vec![uplink(1, -90, 5.0), uplink(2, -70, 5.0)];
        assert_eq!(pick_canonical(&members), 1);
    }
}
