use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};

use crate::cache::Cache;
use crate::chat::{ChatEngine, private_room_id};
use crate::db::Db;
use crate::error::{Error, Result};
use crate::models::*;

const HELLO_TEXT: &str = "You are now friends, say hi!";

/// How often a failed hello-message insert is retried before giving up.
const HELLO_APPEND_ATTEMPTS: u32 = 3;

const INVITE_COLUMNS: &str =
    "id, user_id, target_id, note, reply, status, created_at, updated_at";

/// What an `invite` call did.
pub enum InviteOutcome {
    /// A pending invite exists (freshly created or republished); notify the
    /// target.
    Pending(Invite),
    /// The pair went straight to mutual (re-add after a unilateral delete,
    /// or an opposite-direction pending invite counted as acceptance).
    Mutual { hello: Option<ChatMessage> },
}

pub struct DecideOutcome {
    pub invite: Invite,
    /// Present when the decision formed a mutual friendship.
    pub hello: Option<ChatMessage>,
}

/// Friendship & Invitation Engine. All pair state is stored normalised
/// (`user_a_id < user_b_id`); callers speak in terms of "me" and "peer" and
/// never see the raw bit masks.
pub struct FriendEngine {
    db: Arc<Db>,
    cache: Arc<Cache>,
    chat: Arc<ChatEngine>,
}

fn row_to_relation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relation> {
    Ok(Relation {
        id: row.get(0)?,
        user_a_id: row.get(1)?,
        user_b_id: row.get(2)?,
        status: row.get(3)?,
        block_status: row.get(4)?,
        remark_on_a: row.get(5)?,
        remark_on_b: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_invite(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invite> {
    Ok(Invite {
        id: row.get(0)?,
        user_id: row.get(1)?,
        target_id: row.get(2)?,
        note: row.get(3)?,
        reply: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn sort_pair(a: i64, b: i64) -> (i64, i64) {
    if a < b { (a, b) } else { (b, a) }
}

impl FriendEngine {
    pub fn new(db: Arc<Db>, cache: Arc<Cache>, chat: Arc<ChatEngine>) -> Self {
        FriendEngine { db, cache, chat }
    }

    // --- Lookups ---

    /// Relation row for an unordered pair, read-through cached.
    pub fn relation_of(&self, user_a: i64, user_b: i64) -> Result<Relation> {
        let key = self.cache.key_relation(user_a, user_b);
        match self.cache.get::<Relation>(&key) {
            Ok(Some(relation)) => return Ok(relation),
            Ok(None) => {}
            Err(err) => return Err(err.into_engine()),
        }

        let (lo, hi) = sort_pair(user_a, user_b);
        let found = {
            let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.query_row(
                "SELECT id, user_a_id, user_b_id, status, block_status, remark_on_a,
                        remark_on_b, created_at, updated_at
                 FROM user_relation WHERE user_a_id = ?1 AND user_b_id = ?2",
                params![lo, hi],
                row_to_relation,
            )
            .optional()?
        };
        match found {
            Some(relation) => {
                self.cache.set(&key, &relation);
                Ok(relation)
            }
            None => {
                self.cache.set_empty(&key);
                Err(Error::NotFound)
            }
        }
    }

    pub fn get_invite(&self, id: i64) -> Result<Invite> {
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            &format!("SELECT {INVITE_COLUMNS} FROM user_relation_invite WHERE id = ?1"),
            params![id],
            row_to_invite,
        )
        .map_err(Error::from)
    }

    /// The pending invite between a pair, in either direction. Read-through
    /// cached; "nothing pending" is remembered with an empty marker.
    fn pending_between(&self, a: i64, b: i64) -> Result<Option<Invite>> {
        let key = self.cache.key_invite(a, b);
        match self.cache.get::<Invite>(&key) {
            Ok(Some(invite)) => return Ok(Some(invite)),
            Ok(None) => {}
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        }

        let found = {
            let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.query_row(
                &format!(
                    "SELECT {INVITE_COLUMNS} FROM user_relation_invite
                     WHERE ((user_id = ?1 AND target_id = ?2)
                         OR (user_id = ?2 AND target_id = ?1))
                       AND status = ?3"
                ),
                params![a, b, INVITE_STATUS_PENDING],
                row_to_invite,
            )
            .optional()?
        };
        match &found {
            Some(invite) => self.cache.set(&key, invite),
            None => self.cache.set_empty(&key),
        }
        Ok(found)
    }

    // --- Invitations ---

    /// Ask `to` to become friends with `from`. See the state machine: an
    /// existing mutual pair rejects, a half-open pair flips straight to
    /// mutual, a same-direction pending invite is republished, an
    /// opposite-direction one counts as acceptance.
    pub fn invite(&self, from: i64, to: i64, note: &str) -> Result<InviteOutcome> {
        if from == to {
            return Err(Error::Invalid("cannot invite yourself".to_string()));
        }

        let relation = match self.relation_of(from, to) {
            Ok(relation) => Some(relation),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };

        if let Some(relation) = &relation {
            if relation.view_for(from).is_mutual {
                return Err(Error::Conflict("already friends".to_string()));
            }
            // The pair knew each other before and one side dropped the
            // other; a fresh invite restores the friendship directly.
            let hello = self.become_mutual(from, to, None)?;
            return Ok(InviteOutcome::Mutual { hello });
        }

        if let Some(invite) = self.pending_between(from, to)? {
            if invite.user_id == from {
                // Same direction: no second row, just notify again.
                return Ok(InviteOutcome::Pending(invite));
            }
            // Opposite direction: both want it, treat as acceptance. The
            // hello flows from the original inviter.
            let hello = self.become_mutual(invite.user_id, invite.target_id, Some(invite.id))?;
            return Ok(InviteOutcome::Mutual { hello });
        }

        let now = now_millis();
        let (lo, hi) = sort_pair(from, to);
        let invite = {
            let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            let inserted = conn.execute(
                "INSERT INTO user_relation_invite
                     (user_id, target_id, note, status, uq_flag, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    from,
                    to,
                    note,
                    INVITE_STATUS_PENDING,
                    format!("{lo}_{hi}"),
                    now
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if e.to_string().contains("UNIQUE") => {
                    return Err(Error::Conflict("invite already pending".to_string()));
                }
                Err(e) => return Err(e.into()),
            }
            Invite {
                id: conn.last_insert_rowid(),
                user_id: from,
                target_id: to,
                note: note.to_string(),
                reply: String::new(),
                status: INVITE_STATUS_PENDING,
                created_at: now,
                updated_at: now,
            }
        };
        self.cache.delete(&self.cache.key_invite(from, to));
        Ok(InviteOutcome::Pending(invite))
    }

    /// Target-only resolution of a pending invite.
    pub fn decide(&self, invite_id: i64, decider: i64, status: i64, reply: &str) -> Result<DecideOutcome> {
        if status != INVITE_STATUS_ACCEPTED && status != INVITE_STATUS_REJECTED {
            return Err(Error::Invalid("'status' must be 1 or 2".to_string()));
        }
        let mut invite = self.get_invite(invite_id).map_err(|e| e.into_engine())?;
        if invite.target_id != decider {
            return Err(Error::Forbidden("not the invite target".to_string()));
        }
        if invite.status != INVITE_STATUS_PENDING {
            return Err(Error::Conflict("invite already resolved".to_string()));
        }

        if status == INVITE_STATUS_REJECTED {
            let now = now_millis();
            {
                let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
                resolve_invite(&conn, invite_id, INVITE_STATUS_REJECTED, reply, now)?;
            }
            self.cache
                .delete(&self.cache.key_invite(invite.user_id, invite.target_id));
            invite.status = INVITE_STATUS_REJECTED;
            invite.reply = reply.to_string();
            invite.updated_at = now;
            return Ok(DecideOutcome { invite, hello: None });
        }

        let hello = self.accept_invite(&invite, reply)?;
        invite.status = INVITE_STATUS_ACCEPTED;
        invite.reply = reply.to_string();
        Ok(DecideOutcome { invite, hello })
    }

    /// Unilateral relationship edits: delete (`status = 0`), block/unblock,
    /// or remark. The caller's intent lands on their own half of the masks.
    pub fn update_friend(
        &self,
        by: i64,
        peer: i64,
        status: Option<i64>,
        block_status: Option<i64>,
        remark: Option<&str>,
    ) -> Result<()> {
        if status.is_none() && block_status.is_none() && remark.is_none() {
            return Err(Error::Invalid("nothing to update".to_string()));
        }
        if let Some(status) = status {
            if status != 0 {
                return Err(Error::Invalid("'status' only accepts 0".to_string()));
            }
        }
        if let Some(block) = block_status {
            if block != 0 && block != 1 {
                return Err(Error::Invalid("'block_status' must be 0 or 1".to_string()));
            }
        }

        let relation = self.relation_of(by, peer).map_err(|e| e.into_engine())?;
        let my_bit = relation.bit_for(by);

        let mut new_status = relation.status;
        if status == Some(0) {
            new_status &= !my_bit;
        }
        let mut new_block = relation.block_status;
        match block_status {
            Some(1) => new_block |= my_bit,
            Some(0) => new_block &= !my_bit,
            _ => {}
        }
        let (mut remark_a, mut remark_b) =
            (relation.remark_on_a.clone(), relation.remark_on_b.clone());
        if let Some(remark) = remark {
            // A's name for B lives in remark_on_b and vice versa.
            if by == relation.user_a_id {
                remark_b = remark.to_string();
            } else {
                remark_a = remark.to_string();
            }
        }

        if new_status == relation.status
            && new_block == relation.block_status
            && remark_a == relation.remark_on_a
            && remark_b == relation.remark_on_b
        {
            return Err(Error::Conflict("not change".to_string()));
        }

        {
            let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.execute(
                "UPDATE user_relation
                 SET status = ?1, block_status = ?2, remark_on_a = ?3, remark_on_b = ?4,
                     updated_at = ?5
                 WHERE id = ?6",
                params![new_status, new_block, remark_a, remark_b, now_millis(), relation.id],
            )?;
        }
        self.cache
            .delete(&self.cache.key_relation(relation.user_a_id, relation.user_b_id));
        Ok(())
    }

    // --- Mutual transitions ---

    /// Accept: invite resolution and the relation upsert commit together;
    /// the hello message is injected afterwards and never rolls them back.
    fn accept_invite(&self, invite: &Invite, reply: &str) -> Result<Option<ChatMessage>> {
        let now = now_millis();
        {
            let mut conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .map_err(|e| Error::Transient(e.to_string()))?;
            resolve_invite(&tx, invite.id, INVITE_STATUS_ACCEPTED, reply, now)?;
            upsert_mutual(&tx, invite.user_id, invite.target_id, now)?;
            tx.commit().map_err(|e| Error::Transient(e.to_string()))?;
        }
        self.bust_pair_caches(invite.user_id, invite.target_id);
        Ok(self.send_hello(invite.user_id, invite.target_id))
    }

    /// Flip a pair to mutual outside the decide flow, optionally marking the
    /// opposite-direction invite accepted in the same transaction.
    fn become_mutual(&self, from: i64, to: i64, invite_id: Option<i64>) -> Result<Option<ChatMessage>> {
        let now = now_millis();
        {
            let mut conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .map_err(|e| Error::Transient(e.to_string()))?;
            if let Some(id) = invite_id {
                resolve_invite(&tx, id, INVITE_STATUS_ACCEPTED, "", now)?;
            }
            upsert_mutual(&tx, from, to, now)?;
            tx.commit().map_err(|e| Error::Transient(e.to_string()))?;
        }
        self.bust_pair_caches(from, to);
        Ok(self.send_hello(from, to))
    }

    fn bust_pair_caches(&self, a: i64, b: i64) {
        self.cache.delete(&self.cache.key_relation(a, b));
        self.cache.delete(&self.cache.key_invite(a, b));
    }

    /// Inject the system-authored "you are now friends" chat message.
    /// A failed insert is logged and retried a bounded number of times;
    /// it never propagates — the friendship already stands.
    fn send_hello(&self, sender: i64, receiver: i64) -> Option<ChatMessage> {
        let mut msg = ChatMessage {
            id: String::new(),
            message_id: 0,
            room_id: private_room_id(sender, receiver),
            kind: MESSAGE_KIND_PLAIN,
            session_type: SESSION_TYPE_PRIVATE,
            sender_id: sender,
            receiver_id: receiver,
            send_status: 1,
            read_status: 0,
            status: MESSAGE_STATUS_NORMAL,
            body: MessageBody {
                text: Some(HELLO_TEXT.to_string()),
                ..MessageBody::default()
            },
            created_at: 0,
            updated_at: 0,
        };
        for attempt in 1..=HELLO_APPEND_ATTEMPTS {
            match self.chat.append(&mut msg) {
                Ok(()) => return Some(msg),
                Err(err) => log::error!(
                    "hello message for pair ({sender}, {receiver}) failed \
                     (attempt {attempt}/{HELLO_APPEND_ATTEMPTS}): {err}"
                ),
            }
        }
        None
    }
}

/// Flip a pending invite to its final status and retire its `uq_flag` so the
/// pair can hold a new pending invite later.
fn resolve_invite(
    conn: &Connection,
    invite_id: i64,
    status: i64,
    reply: &str,
    now: i64,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE user_relation_invite
         SET status = ?1, reply = ?2, updated_at = ?3,
             uq_flag = uq_flag || '_' || ?4
         WHERE id = ?5 AND status = ?6",
        params![status, reply, now, now / 1000, invite_id, INVITE_STATUS_PENDING],
    )?;
    if changed == 0 {
        return Err(Error::Conflict("invite already resolved".to_string()));
    }
    Ok(())
}

/// Upsert the pair row into the mutual state: both status bits set, both
/// block bits cleared.
fn upsert_mutual(conn: &Connection, a: i64, b: i64, now: i64) -> Result<()> {
    let (lo, hi) = sort_pair(a, b);
    conn.execute(
        "INSERT INTO user_relation (user_a_id, user_b_id, status, block_status, created_at, updated_at)
         VALUES (?1, ?2, ?3, 0, ?4, ?4)
         ON CONFLICT(user_a_id, user_b_id) DO UPDATE SET
             status = ?3, block_status = 0, updated_at = ?4",
        params![lo, hi, RELATION_MUTUAL, now],
    )?;
    Ok(())
}
