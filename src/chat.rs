use std::sync::Arc;

use rusqlite::{Connection, params};

use crate::cache::{Cache, LAST_MESSAGE_LIMIT};
use crate::db::Db;
use crate::error::{Error, Result};
use crate::models::*;

const DEFAULT_WINDOW_LIMIT: i64 = 20;
const MAX_WINDOW_LIMIT: i64 = 1000;

/// Rollback window: a message can only be recalled this soon after sending.
const ROLLBACK_WINDOW_MS: i64 = 2 * 60 * 1000;

// --- Room id derivation ---

/// Private rooms pair the two user ids, smaller first.
pub fn private_room_id(user_a: i64, user_b: i64) -> String {
    let (lo, hi) = if user_a < user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };
    format!("{lo:08x}{hi:08x}")
}

pub fn group_room_id(group_id: i64) -> String {
    format!("{group_id:08x}")
}

pub fn world_room_id(world_id: i64) -> String {
    format!("world_{world_id:04x}")
}

/// Room & Message Engine: per-room monotonic ids, durable appends, bounded
/// recent-message cache, time-bounded rollback.
pub struct ChatEngine {
    db: Arc<Db>,
    cache: Arc<Cache>,
}

impl ChatEngine {
    pub fn new(db: Arc<Db>, cache: Arc<Cache>) -> Self {
        ChatEngine { db, cache }
    }

    /// Persist a message, assigning its internal id and per-room
    /// `message_id`. Concurrent appends to one room serialise at the room
    /// counter; the counter value is never reused even if the later insert
    /// fails (the gap is logged and stands).
    pub fn append(&self, msg: &mut ChatMessage) -> Result<()> {
        {
            let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            append_inner(&conn, msg)?;
        }
        self.push_recent_cache(msg);
        Ok(())
    }

    /// `append` with the room upsert, message insert and snapshot update in
    /// one transaction. The cache push stays outside: a lost push is
    /// reconciled by the next `list_last` store refill.
    pub fn append_tx(&self, msg: &mut ChatMessage) -> Result<()> {
        {
            let mut conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .map_err(|e| Error::Transient(e.to_string()))?;
            append_inner(&tx, msg)?;
            tx.commit().map_err(|e| Error::Transient(e.to_string()))?;
        }
        self.push_recent_cache(msg);
        Ok(())
    }

    fn push_recent_cache(&self, msg: &ChatMessage) {
        let key = self
            .cache
            .key_last_messages(&msg.room_id, msg.session_type);
        self.cache.push_recent(&key, msg);
    }

    /// Fetch one message by its internal id.
    pub fn get(&self, id: &str) -> Result<ChatMessage> {
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            params![id],
            row_to_message,
        )
        .map_err(Error::from)
    }

    /// Mark a message rolled back, only while its status is not already
    /// rolled back and it is younger than two minutes. Returns whether a row
    /// changed; a second call on the same message returns false.
    pub fn rollback(&self, id: &str) -> Result<bool> {
        let now = now_millis();
        let cutoff = now - ROLLBACK_WINDOW_MS;
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        let changed = conn.execute(
            "UPDATE messages SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status != ?1 AND created_at > ?4",
            params![MESSAGE_STATUS_ROLLED_BACK, now, id, cutoff],
        )?;
        if changed > 0 {
            self.evict_recent(id, &conn);
        }
        Ok(changed > 0)
    }

    /// Soft-delete a message. No time window, no fan-out.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let now = now_millis();
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        let changed = conn.execute(
            "UPDATE messages SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status != ?1",
            params![MESSAGE_STATUS_DELETED, now, id],
        )?;
        if changed > 0 {
            self.evict_recent(id, &conn);
        }
        Ok(changed > 0)
    }

    /// The recent list may hold the pre-mutation snapshot; drop the whole
    /// key and let the next read refill from the store.
    fn evict_recent(&self, id: &str, conn: &Connection) {
        let room: std::result::Result<(String, i64), _> = conn.query_row(
            "SELECT room_id, session_type FROM messages WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        );
        if let Ok((room_id, session_type)) = room {
            self.cache
                .delete(&self.cache.key_last_messages(&room_id, session_type));
        }
    }

    /// Up to 20 most-recent messages, `message_id` descending. Cache-first;
    /// a store miss is remembered with a short-lived empty marker.
    pub fn list_last(&self, room_id: &str, session_type: i64) -> Result<Vec<ChatMessage>> {
        let key = self.cache.key_last_messages(room_id, session_type);
        match self.cache.recent(&key) {
            Ok(Some(messages)) => return Ok(messages),
            Ok(None) => {}
            Err(err) => return Err(err.into_engine()),
        }

        let messages = {
            let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE room_id = ?1 AND session_type = ?2
                 ORDER BY message_id DESC LIMIT ?3"
            ))?;
            let rows = stmt.query_map(
                params![room_id, session_type, LAST_MESSAGE_LIMIT as i64],
                row_to_message,
            )?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        if messages.is_empty() {
            self.cache.set_empty(&key);
            return Err(Error::NotFound);
        }
        self.cache.fill_recent(&key, &messages);
        Ok(messages)
    }

    /// Messages with `message_id` in `[from, from + limit)`, descending.
    pub fn list_window(
        &self,
        room_id: &str,
        session_type: i64,
        from: i64,
        limit: i64,
    ) -> Result<Vec<ChatMessage>> {
        let limit = if limit <= 0 {
            DEFAULT_WINDOW_LIMIT
        } else {
            limit.min(MAX_WINDOW_LIMIT)
        };
        let from = from.max(0);
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE room_id = ?1 AND session_type = ?2
               AND message_id >= ?3 AND message_id < ?4
             ORDER BY message_id DESC"
        ))?;
        let rows = stmt.query_map(
            params![room_id, session_type, from, from + limit],
            row_to_message,
        )?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Room metadata including the embedded last-message snapshot.
    pub fn room(&self, room_id: &str) -> Result<ChatRoom> {
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            "SELECT room_id, session_type, last_message_id, last_message, created_at, updated_at
             FROM rooms WHERE room_id = ?1",
            params![room_id],
            |row| {
                let snapshot: Option<String> = row.get(3)?;
                Ok(ChatRoom {
                    room_id: row.get(0)?,
                    session_type: row.get(1)?,
                    last_message_id: row.get(2)?,
                    last_message: snapshot
                        .and_then(|raw| serde_json::from_str(&raw).ok()),
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            },
        )
        .map_err(Error::from)
    }
}

const MESSAGE_COLUMNS: &str = "id, message_id, room_id, type, session_type, sender_id, \
     receiver_id, send_status, read_status, status, body, created_at, updated_at";

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let body_raw: String = row.get(10)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        message_id: row.get(1)?,
        room_id: row.get(2)?,
        kind: row.get(3)?,
        session_type: row.get(4)?,
        sender_id: row.get(5)?,
        receiver_id: row.get(6)?,
        send_status: row.get(7)?,
        read_status: row.get(8)?,
        status: row.get(9)?,
        body: serde_json::from_str(&body_raw).unwrap_or_default(),
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Steps 1–3 of the append contract against one connection (plain or
/// transactional).
fn append_inner(conn: &Connection, msg: &mut ChatMessage) -> Result<()> {
    if msg.created_at == 0 {
        msg.created_at = now_millis();
    }
    if msg.updated_at == 0 {
        msg.updated_at = msg.created_at;
    }
    msg.id = uuid::Uuid::new_v4().to_string();

    // Atomic upsert: bump the room counter, stamp updated_at, seed the room
    // row on first contact, and read the new counter back.
    let message_id: i64 = conn
        .query_row(
            "INSERT INTO rooms (room_id, session_type, last_message_id, created_at, updated_at)
             VALUES (?1, ?2, 1, ?3, ?3)
             ON CONFLICT(room_id) DO UPDATE SET
                 last_message_id = last_message_id + 1,
                 updated_at = excluded.updated_at
             RETURNING last_message_id",
            params![msg.room_id, msg.session_type, msg.created_at],
            |r| r.get(0),
        )
        .map_err(|e| Error::Transient(format!("room counter: {e}")))?;
    msg.message_id = message_id;

    let body = serde_json::to_string(&msg.body)?;
    let inserted = conn.execute(
        "INSERT INTO messages (id, message_id, room_id, type, session_type, sender_id,
             receiver_id, send_status, read_status, status, body, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            msg.id,
            msg.message_id,
            msg.room_id,
            msg.kind,
            msg.session_type,
            msg.sender_id,
            msg.receiver_id,
            msg.send_status,
            msg.read_status,
            msg.status,
            body,
            msg.created_at,
            msg.updated_at
        ],
    );
    if let Err(err) = inserted {
        // The counter already advanced; message_id now has a permanent gap.
        log::error!(
            "message insert failed after counter increment, room {} gap at {}: {err}",
            msg.room_id,
            msg.message_id
        );
        return Err(Error::Transient(err.to_string()));
    }

    // Refresh the room's last-message snapshot, but only forward: a slower
    // concurrent writer with a lower id must not clobber a newer snapshot.
    let snapshot = serde_json::to_string(&msg)?;
    conn.execute(
        "UPDATE rooms SET last_message = ?1, last_message_seq = ?2
         WHERE room_id = ?3 AND last_message_seq < ?2",
        params![snapshot, msg.message_id, msg.room_id],
    )?;

    Ok(())
}
