use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::models::ChatMessage;

/// Cap of the per-room recent-message list.
pub const LAST_MESSAGE_LIMIT: usize = 20;

/// Lifetime of an "empty marker" — long enough to absorb a negative-lookup
/// storm, short enough that a freshly created row shows up soon.
const EMPTY_MARKER_TTL: Duration = Duration::from_secs(30);

const BASE_TTL_SECS: u64 = 600;
const TTL_JITTER_SECS: u64 = 300;

enum Slot {
    /// A JSON-encoded record.
    Record(String),
    /// The store had no row for this key when last asked.
    Empty,
    /// Newest-first bounded message list.
    List(VecDeque<ChatMessage>),
}

struct Entry {
    slot: Slot,
    expires_at: Instant,
}

/// In-process read-through cache. Correctness never depends on it: every
/// entry can vanish at any moment and the engines fall back to the store.
pub struct Cache {
    prefix: String,
    entries: Mutex<HashMap<String, Entry>>,
}

/// Randomised TTL so a burst of writes does not expire in one stampede.
fn random_ttl() -> Duration {
    let jitter = rand::thread_rng().gen_range(0..TTL_JITTER_SECS);
    Duration::from_secs(BASE_TTL_SECS + jitter)
}

impl Cache {
    pub fn new(prefix: &str) -> Self {
        Cache {
            prefix: prefix.to_string(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    // --- Key formatting ---

    pub fn key_user(&self, id: i64) -> String {
        format!("{}:user:id:{id}", self.prefix)
    }

    pub fn key_username(&self, username: &str) -> String {
        format!("{}:user:username:{username}", self.prefix)
    }

    pub fn key_relation(&self, a: i64, b: i64) -> String {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        format!("{}:relation:users:{lo}_{hi}", self.prefix)
    }

    pub fn key_invite(&self, a: i64, b: i64) -> String {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        format!("{}:invite:users:{lo}_{hi}", self.prefix)
    }

    pub fn key_group(&self, id: i64) -> String {
        format!("{}:group:id:{id}", self.prefix)
    }

    pub fn key_group_members(&self, id: i64) -> String {
        format!("{}:group:members:{id}", self.prefix)
    }

    pub fn key_last_messages(&self, room_id: &str, session_type: i64) -> String {
        format!("{}:chat:last:{room_id}:{session_type}", self.prefix)
    }

    // --- Records ---

    /// `Ok(Some)` = hit, `Ok(None)` = miss, `Err(EmptyMarker)` = negative hit.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match live(&mut entries, key) {
            Some(Slot::Record(raw)) => Ok(Some(serde_json::from_str(raw)?)),
            Some(Slot::Empty) => Err(Error::EmptyMarker),
            Some(Slot::List(_)) | None => Ok(None),
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("cache encode failed for {key}: {err}");
                return;
            }
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Record(raw),
                expires_at: Instant::now() + random_ttl(),
            },
        );
    }

    /// Record "the store has no row here". SetNX semantics: a live entry of
    /// any shape wins over the marker.
    pub fn set_empty(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if live(&mut entries, key).is_some() {
            return;
        }
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Empty,
                expires_at: Instant::now() + EMPTY_MARKER_TTL,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }

    // --- Recent-message lists ---

    /// Append one message to the bounded recent list, evicting the oldest on
    /// overflow. A key holding a different shape is deleted and the push
    /// retried, never silently ignored.
    pub fn push_recent(&self, key: &str, msg: &ChatMessage) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for _ in 0..2 {
            let wrong_shape = matches!(
                live(&mut entries, key),
                Some(Slot::Record(_)) | Some(Slot::Empty)
            );
            if wrong_shape {
                log::warn!("cache key {key} held a non-list value, dropping it");
                entries.remove(key);
                continue;
            }
            match entries.get_mut(key) {
                Some(entry) => {
                    if let Slot::List(list) = &mut entry.slot {
                        list.push_front(msg.clone());
                        list.truncate(LAST_MESSAGE_LIMIT);
                        entry.expires_at = Instant::now() + random_ttl();
                    }
                }
                None => {
                    entries.insert(
                        key.to_string(),
                        Entry {
                            slot: Slot::List(VecDeque::from([msg.clone()])),
                            expires_at: Instant::now() + random_ttl(),
                        },
                    );
                }
            }
            return;
        }
    }

    /// Replace the whole recent list (store refill path).
    pub fn fill_recent(&self, key: &str, msgs: &[ChatMessage]) {
        let mut list: VecDeque<ChatMessage> = msgs.iter().cloned().collect();
        list.truncate(LAST_MESSAGE_LIMIT);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::List(list),
                expires_at: Instant::now() + random_ttl(),
            },
        );
    }

    /// `Ok(Some)` = hit (newest first), `Ok(None)` = miss,
    /// `Err(EmptyMarker)` = the store is known to have nothing.
    pub fn recent(&self, key: &str) -> Result<Option<Vec<ChatMessage>>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match live(&mut entries, key) {
            Some(Slot::List(list)) => Ok(Some(list.iter().cloned().collect())),
            Some(Slot::Empty) => Err(Error::EmptyMarker),
            Some(Slot::Record(_)) | None => Ok(None),
        }
    }
}

/// Drop the entry if expired, otherwise hand back its slot.
fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Slot> {
    let expired = entries.get(key).map(|e| e.expires_at <= Instant::now());
    match expired {
        None => None,
        Some(true) => {
            entries.remove(key);
            None
        }
        Some(false) => entries.get_mut(key).map(|e| &mut e.slot),
    }
}
