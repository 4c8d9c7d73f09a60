use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::mpsc;

/// Shard count. A power of two so the hash can be masked.
pub const SHARD_COUNT: usize = 16;

/// Targeted pushes are processed in batches of this many keys.
const PUSH_BATCH: usize = 200;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Router key: user ids for targeted pushes, strings for named channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Id(i64),
    Name(String),
}

impl From<i64> for SessionKey {
    fn from(id: i64) -> Self {
        SessionKey::Id(id)
    }
}

impl From<&str> for SessionKey {
    fn from(name: &str) -> Self {
        SessionKey::Name(name.to_string())
    }
}

fn shard_index(key: &SessionKey) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) & (SHARD_COUNT - 1)
}

/// Handle on one live push connection. Sending enqueues onto the session's
/// unbounded outbound queue; the per-connection writer task drains it, so a
/// slow socket costs one task and never blocks a sibling send.
#[derive(Clone)]
pub struct Session {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

impl Session {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Session {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// False once the connection side is gone.
    fn send(&self, payload: &str) -> bool {
        self.tx.send(payload.to_string()).is_ok()
    }
}

struct Shard {
    sessions: RwLock<HashMap<SessionKey, HashMap<u64, Session>>>,
}

struct RouterInner {
    shards: Vec<Shard>,
    key_count: AtomicI64,
    connect_count: AtomicI64,
}

/// Sharded map from key to live sessions: broadcast, multicast and targeted
/// push with per-session failure isolation.
#[derive(Clone)]
pub struct SessionRouter {
    inner: Arc<RouterInner>,
}

impl Default for SessionRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRouter {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| Shard {
                sessions: RwLock::new(HashMap::new()),
            })
            .collect();
        SessionRouter {
            inner: Arc::new(RouterInner {
                shards,
                key_count: AtomicI64::new(0),
                connect_count: AtomicI64::new(0),
            }),
        }
    }

    pub fn attach(&self, key: SessionKey, session: Session) {
        let shard = &self.inner.shards[shard_index(&key)];
        let mut map = shard.sessions.write().unwrap_or_else(|e| e.into_inner());
        let set = map.entry(key).or_insert_with(|| {
            self.inner.key_count.fetch_add(1, Ordering::Relaxed);
            HashMap::new()
        });
        set.insert(session.id, session);
        self.inner.connect_count.fetch_add(1, Ordering::Relaxed);
        log::info!("session attached, {} connections", self.connect_count());
    }

    pub fn detach(&self, key: &SessionKey, session_id: u64) {
        let shard = &self.inner.shards[shard_index(key)];
        let mut map = shard.sessions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(set) = map.get_mut(key) {
            if set.remove(&session_id).is_some() {
                self.inner.connect_count.fetch_sub(1, Ordering::Relaxed);
            }
            if set.is_empty() {
                map.remove(key);
                self.inner.key_count.fetch_sub(1, Ordering::Relaxed);
            }
        }
        log::info!("session detached, {} connections", self.connect_count());
    }

    /// Deliver a pre-serialised text payload. Empty `keys` broadcasts to
    /// every session; otherwise keys are resolved in batches of 200. The
    /// read lock covers only the lookup, never a socket write.
    pub fn push_raw(&self, payload: &str, keys: &[SessionKey]) {
        let mut dead: Vec<(SessionKey, u64)> = Vec::new();

        if keys.is_empty() {
            for shard in &self.inner.shards {
                let map = shard.sessions.read().unwrap_or_else(|e| e.into_inner());
                for (key, set) in map.iter() {
                    for session in set.values() {
                        if !session.send(payload) {
                            dead.push((key.clone(), session.id));
                        }
                    }
                }
            }
        } else {
            for batch in keys.chunks(PUSH_BATCH) {
                for key in batch {
                    let shard = &self.inner.shards[shard_index(key)];
                    let map = shard.sessions.read().unwrap_or_else(|e| e.into_inner());
                    if let Some(set) = map.get(key) {
                        for session in set.values() {
                            if !session.send(payload) {
                                dead.push((key.clone(), session.id));
                            }
                        }
                    }
                }
            }
        }

        // Lazy cleanup of connections detected broken on this send.
        for (key, session_id) in dead {
            log::warn!("push to closed session {session_id}, detaching");
            self.detach(&key, session_id);
        }
    }

    /// JSON-serialise a domain object and deliver it.
    pub fn push_json<T: Serialize>(&self, data: &T, keys: &[SessionKey]) {
        let payload = match serde_json::to_string(data) {
            Ok(payload) => payload,
            Err(err) => {
                log::error!("push payload failed to serialise: {err}");
                return;
            }
        };
        self.push_raw(&payload, keys);
    }

    pub fn connect_count(&self) -> i64 {
        self.inner.connect_count.load(Ordering::Relaxed)
    }

    pub fn key_count(&self) -> i64 {
        self.inner.key_count.load(Ordering::Relaxed)
    }
}
