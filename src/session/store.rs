//! In-memory reference `SessionStore`, generalized from the teacher's
//! `CompactFrameCache`: a public handle wrapping `Arc<Mutex<Inner>>`, with
//! the inner state doing all the bookkeeping. The teacher's cache evicts by
//! a fixed-capacity LRU; this store instead expires entries by per-key TTL,
//! since the spec's contract is TTL-keyed, not capacity-bounded. A real
//! deployment backs `SessionStore` with Redis (the pluggable framing of
//! spec §6) — this implementation exists so the crate is runnable
//! end-to-end without one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::NsError;
use crate::session::keys;
use crate::session::model::DeviceSession;
use crate::types::{DevAddr, DevEui};

/// Required operations per spec §4.5: session CRUD, atomic set-add with a
/// reliable `newlyAdded` flag, generic key/value with TTL, and a
/// process-wide expiring lock.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, dev_eui: DevEui) -> Result<Option<DeviceSession>, NsError>;
    async fn get_sessions_for_dev_addr(&self, dev_addr: DevAddr) -> Result<Vec<DeviceSession>, NsError>;
    async fn save_session(&self, session: DeviceSession, ttl: Duration) -> Result<(), NsError>;
    async fn delete_session(&self, dev_eui: DevEui) -> Result<(), NsError>;

    /// Adds `member` to the set at `key`, refreshing its TTL. Returns
    /// whether `member` was newly added — the deduplicator's correctness
    /// depends on this flag being reliable under concurrent callers.
    async fn set_add(&self, key: &str, member: String, ttl: Duration) -> Result<bool, NsError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, NsError>;

    /// Atomically appends `value` to the list at `key`, refreshing its TTL,
    /// and returns the full list as it stands immediately after the append.
    /// A separate primitive from `put`/`get` because the deduplicator
    /// appends concurrently from multiple gateway-copy callers; a read-then-
    /// write built from `get` and `put` would let two concurrent appends
    /// race and silently drop one gateway's member.
    async fn list_append(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<Vec<Vec<u8>>, NsError>;
    async fn list_members(&self, key: &str) -> Result<Vec<Vec<u8>>, NsError>;

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), NsError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, NsError>;
    async fn delete(&self, key: &str) -> Result<(), NsError>;

    /// Acquires a process-wide lock at `key` with automatic expiry after
    /// `ttl`. Returns `false` if already held by a live lock.
    async fn lock(&self, key: &str, ttl: Duration) -> Result<bool, NsError>;
}

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Expiring<DeviceSession>>,
    devaddr_sets: HashMap<String, Expiring<HashSet<String>>>,
    kv: HashMap<String, Expiring<Vec<u8>>>,
    lists: HashMap<String, Expiring<Vec<Vec<u8>>>>,
    locks: HashMap<String, Instant>,
}

/// In-memory `SessionStore`, safe to share across the two long-lived
/// consumer tasks via `Arc`.
pub struct InMemorySessionStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Inner::default())) }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_session(&self, dev_eui: DevEui) -> Result<Option<DeviceSession>, NsError> {
        let mut inner = self.inner.lock().await;
        let key = keys::device_session(dev_eui);
        let now = Instant::now();
        if let Some(entry) = inner.sessions.get(&key) {
            if entry.expires_at < now {
                inner.sessions.remove(&key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn get_sessions_for_dev_addr(&self, dev_addr: DevAddr) -> Result<Vec<DeviceSession>, NsError> {
        let mut inner = self.inner.lock().await;
        let set_key = keys::devaddr_set(dev_addr);
        let now = Instant::now();

        let euis: Vec<String> = match inner.devaddr_sets.get(&set_key) {
            Some(entry) if entry.expires_at >= now => entry.value.iter().cloned().collect(),
            Some(_) => {
                inner.devaddr_sets.remove(&set_key);
                return Ok(Vec::new());
            }
            None => return Ok(Vec::new()),
        };

        let mut sessions = Vec::with_capacity(euis.len());
        for eui_hex in euis {
            let session_key = format!("lora:ns:device-session:{eui_hex}");
            if let Some(entry) = inner.sessions.get(&session_key) {
                if entry.expires_at >= now {
                    sessions.push(entry.value.clone());
                }
            }
        }
        Ok(sessions)
    }

    async fn save_session(&self, session: DeviceSession, ttl: Duration) -> Result<(), NsError> {
        let mut inner = self.inner.lock().await;
        let key = keys::device_session(session.dev_eui);
        let set_key = keys::devaddr_set(session.dev_addr);
        let expires_at = Instant::now() + ttl;

        let eui_hex = session.dev_eui.to_hex();
        inner
            .devaddr_sets
            .entry(set_key)
            .and_modify(|e| {
                e.value.insert(eui_hex.clone());
                e.expires_at = expires_at;
            })
            .or_insert_with(|| Expiring { value: HashSet::from([eui_hex]), expires_at });

        inner.sessions.insert(key, Expiring { value: session, expires_at });
        Ok(())
    }

    async fn delete_session(&self, dev_eui: DevEui) -> Result<(), NsError> {
        let mut inner = self.inner.lock().await;
        let key = keys::device_session(dev_eui);
        if let Some(entry) = inner.sessions.remove(&key) {
            let set_key = keys::devaddr_set(entry.value.dev_addr);
            if let Some(set) = inner.devaddr_sets.get_mut(&set_key) {
                set.value.remove(&dev_eui.to_hex());
            }
        }
        Ok(())
    }

    async fn set_add(&self, key: &str, member: String, ttl: Duration) -> Result<bool, NsError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let expires_at = now + ttl;

        if let Some(entry) = inner.kv.get(key) {
            if entry.expires_at < now {
                inner.kv.remove(key);
            }
        }

        // Sets of strings are tracked in the generic kv store as a
        // newline-joined blob; fine for this reference implementation's
        // scale (dedup sets and downlink candidate lists are small).
        let existing = inner.kv.entry(key.to_string()).or_insert_with(|| Expiring {
            value: Vec::new(),
            expires_at,
        });
        existing.expires_at = expires_at;

        let mut members: HashSet<String> = String::from_utf8_lossy(&existing.value)
            .lines()
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let newly_added = members.insert(member);
        let joined = members.into_iter().collect::<Vec<_>>().join("\n");
        existing.value = joined.into_bytes();
        Ok(newly_added)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, NsError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        match inner.kv.get(key) {
            Some(entry) if entry.expires_at >= now => Ok(String::from_utf8_lossy(&entry.value)
                .lines()
                .map(|s| s.to_string())
                .filter(|s| !s.is_empty())
                .collect()),
            Some(_) => {
                inner.kv.remove(key);
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    async fn list_append(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<Vec<Vec<u8>>, NsError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let expires_at = now + ttl;

        if let Some(entry) = inner.lists.get(key) {
            if entry.expires_at < now {
                inner.lists.remove(key);
            }
        }

        let entry = inner.lists.entry(key.to_string()).or_insert_with(|| Expiring { value: Vec::new(), expires_at });
        entry.expires_at = expires_at;
        entry.value.push(value);
        Ok(entry.value.clone())
    }

    async fn list_members(&self, key: &str) -> Result<Vec<Vec<u8>>, NsError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        match inner.lists.get(key) {
            Some(entry) if entry.expires_at >= now => Ok(entry.value.clone()),
            Some(_) => {
                inner.lists.remove(key);
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), NsError> {
        let mut inner = self.inner.lock().await;
        inner.kv.insert(key.to_string(), Expiring { value, expires_at: Instant::now() + ttl });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, NsError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        match inner.kv.get(key) {
            Some(entry) if entry.expires_at >= now => Ok(Some(entry.value.clone())),
            Some(_) => {
                inner.kv.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), NsError> {
        let mut inner = self.inner.lock().await;
        inner.kv.remove(key);
        Ok(())
    }

    async fn lock(&self, key: &str, ttl: Duration) -> Result<bool, NsError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if let Some(expires_at) = inner.locks.get(key) {
            if *expires_at >= now {
                return Ok(false);
            }
        }
        inner.locks.insert(key.to_string(), now + ttl);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AesKey128, DevAddr, DevEui};

    fn sample_session(dev_eui: [u8; 8], dev_addr: u32) -> DeviceSession {
        DeviceSession::new(DevEui(dev_eui), DevAddr(dev_addr), AesKey128([1; 16]), AesKey128([2; 16]), [0u8])
    }

    #[tokio::test]
    async fn save_and_get_session_round_trips() {
        let store = InMemorySessionStore::new();
        let session = sample_session([1; 8], 0xAAAA_BBBB);
        store.save_session(session.clone(), Duration::from_secs(60)).await.unwrap();

        let loaded = store.get_session(DevEui([1; 8])).await.unwrap().unwrap();
        assert_eq!(loaded.dev_addr, session.dev_addr);
    }

    #[tokio::test]
    async fn get_sessions_for_dev_addr_returns_all_sharing_it() {
        let store = InMemorySessionStore::new();
        store.save_session(sample_session([1; 8], 0x1111_1111), Duration::from_secs(60)).await.unwrap();
        store.save_session(sample_session([2; 8], 0x1111_1111), Duration::from_secs(60)).await.unwrap();

        let sessions = store.get_sessions_for_dev_addr(DevAddr(0x1111_1111)).await.unwrap();
        assert_eq!(sessions.len(), 2);
    }

    #[tokio::test]
    async fn set_add_reports_newly_added_only_once() {
        let store = InMemorySessionStore::new();
        let first = store.set_add("k", "m1".into(), Duration::from_secs(1)).await.unwrap();
        let second = store.set_add("k", "m1".into(), Duration::from_secs(1)).await.unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn list_append_accumulates_every_caller() {
        let store = InMemorySessionStore::new();
        let after_first = store.list_append("members", b"a".to_vec(), Duration::from_secs(1)).await.unwrap();
        let after_second = store.list_append("members", b"b".to_vec(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(after_first, vec![b"a".to_vec()]);
        assert_eq!(after_second, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(store.list_members("members").await.unwrap(), after_second);
    }

    #[tokio::test]
    async fn lock_rejects_concurrent_acquire() {
        let store = InMemorySessionStore::new();
        assert!(store.lock("l", Duration::from_secs(5)).await.unwrap());
        assert!(!store.lock("l", Duration::from_secs(5)).await.unwrap());
    }
}
