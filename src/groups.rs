use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};

use crate::cache::Cache;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::models::*;
use crate::users::UserEngine;

/// Default member cap for new groups.
pub const GROUP_MAX_MEMBER: i64 = 10;

const GROUP_NAME_LIMIT: usize = 50;

const GROUP_COLUMNS: &str = "id, name, max_member, owner_id, speak_status, creator_id, \
     created_at, updater_id, updated_at";

const MEMBER_COLUMNS: &str =
    "id, group_id, user_id, role, speak_status, created_at, updated_at";

/// Cut a string to `limit` characters (not bytes; nicknames are unicode).
fn string_cut(data: &str, limit: usize) -> String {
    data.chars().take(limit).collect()
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        max_member: row.get(2)?,
        owner_id: row.get(3)?,
        speak_status: row.get(4)?,
        creator_id: row.get(5)?,
        created_at: row.get(6)?,
        updater_id: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupMember> {
    Ok(GroupMember {
        id: row.get(0)?,
        group_id: row.get(1)?,
        user_id: row.get(2)?,
        role: row.get(3)?,
        speak_status: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub struct GroupEngine {
    db: Arc<Db>,
    cache: Arc<Cache>,
    users: Arc<UserEngine>,
}

impl GroupEngine {
    pub fn new(db: Arc<Db>, cache: Arc<Cache>, users: Arc<UserEngine>) -> Self {
        GroupEngine { db, cache, users }
    }

    // --- Lookups ---

    pub fn get(&self, group_id: i64) -> Result<Group> {
        let key = self.cache.key_group(group_id);
        match self.cache.get::<Group>(&key) {
            Ok(Some(group)) => return Ok(group),
            Ok(None) => {}
            Err(err) => return Err(err.into_engine()),
        }

        let found = {
            let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?1"),
                params![group_id],
                row_to_group,
            )
            .optional()?
        };
        match found {
            Some(group) => {
                self.cache.set(&key, &group);
                Ok(group)
            }
            None => {
                self.cache.set_empty(&key);
                Err(Error::NotFound)
            }
        }
    }

    pub fn member(&self, group_id: i64, user_id: i64) -> Result<GroupMember> {
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            &format!("SELECT {MEMBER_COLUMNS} FROM group_member WHERE group_id = ?1 AND user_id = ?2"),
            params![group_id, user_id],
            row_to_member,
        )
        .map_err(Error::from)
    }

    pub fn member_count(&self, group_id: i64) -> Result<i64> {
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM group_member WHERE group_id = ?1",
            params![group_id],
            |r| r.get(0),
        )?)
    }

    /// Member ids, cached: this feeds every group fan-out as
    /// `publish_targets` so subscribers never re-query membership.
    pub fn member_ids(&self, group_id: i64) -> Result<Vec<i64>> {
        let key = self.cache.key_group_members(group_id);
        match self.cache.get::<Vec<i64>>(&key) {
            Ok(Some(ids)) => return Ok(ids),
            Ok(None) => {}
            Err(err) => return Err(err.into_engine()),
        }

        let ids = {
            let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            let mut stmt = conn.prepare(
                "SELECT user_id FROM group_member WHERE group_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![group_id], |r| r.get::<_, i64>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        if !ids.is_empty() {
            self.cache.set(&key, &ids);
        }
        Ok(ids)
    }

    pub fn all_members(&self, group_id: i64) -> Result<Vec<GroupMember>> {
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMBER_COLUMNS} FROM group_member WHERE group_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![group_id], row_to_member)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // --- Lifecycle ---

    /// Create a group: creator + de-duplicated members, name derived from
    /// the members' nicknames, creator seeded as the single owner. The whole
    /// flow is one transaction.
    pub fn create(&self, creator: i64, member_ids: &[i64]) -> Result<Group> {
        let mut user_ids = vec![creator];
        for id in member_ids {
            if !user_ids.contains(id) {
                user_ids.push(*id);
            }
        }
        if user_ids.len() < 2 {
            return Err(Error::Invalid("a group needs at least one other member".to_string()));
        }
        if user_ids.len() as i64 > GROUP_MAX_MEMBER {
            return Err(Error::Invalid(format!(
                "member count cannot exceed {GROUP_MAX_MEMBER}"
            )));
        }

        let users = self.users.get_many(&user_ids).map_err(|e| e.into_engine())?;
        let name = string_cut(
            &users
                .iter()
                .map(|u| u.nickname.as_str())
                .collect::<Vec<_>>()
                .join(","),
            GROUP_NAME_LIMIT,
        );

        let now = now_millis();
        let group = {
            let mut conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .map_err(|e| Error::Transient(e.to_string()))?;

            tx.execute(
                "INSERT INTO groups (name, max_member, owner_id, speak_status, creator_id,
                     created_at, updater_id, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?3, ?4, ?3, ?4)",
                params![name, GROUP_MAX_MEMBER, creator, now],
            )?;
            let group_id = tx.last_insert_rowid();

            insert_members(&tx, group_id, &user_ids, creator, now)?;
            tx.execute(
                "UPDATE group_member SET role = ?1, updated_at = ?2
                 WHERE group_id = ?3 AND user_id = ?4",
                params![ROLE_OWNER, now, group_id, creator],
            )?;

            tx.commit().map_err(|e| Error::Transient(e.to_string()))?;
            Group {
                id: group_id,
                name,
                max_member: GROUP_MAX_MEMBER,
                owner_id: creator,
                speak_status: 1,
                creator_id: creator,
                created_at: now,
                updater_id: creator,
                updated_at: now,
            }
        };
        self.cache.set(&self.cache.key_group(group.id), &group);
        self.cache.delete(&self.cache.key_group_members(group.id));
        Ok(group)
    }

    pub fn join(&self, user_id: i64, group_id: i64) -> Result<()> {
        if self.member(group_id, user_id).is_ok() {
            return Err(Error::Conflict("already a member".to_string()));
        }
        let group = self.get(group_id).map_err(|e| e.into_engine())?;
        let count = self.member_count(group_id)?;
        if count + 1 > group.max_member {
            return Err(Error::Conflict("group is full".to_string()));
        }

        let now = now_millis();
        {
            let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            insert_members(&conn, group_id, &[user_id], user_id, now)?;
        }
        self.cache.delete(&self.cache.key_group_members(group_id));
        Ok(())
    }

    /// Leaving is open to admins and normal members; the owner must first
    /// transfer ownership.
    pub fn leave(&self, user_id: i64, group_id: i64) -> Result<()> {
        let member = self.member(group_id, user_id).map_err(|e| e.into_engine())?;
        if member.role == ROLE_OWNER {
            return Err(Error::Forbidden("the owner cannot leave the group".to_string()));
        }
        {
            let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.execute(
                "DELETE FROM group_member WHERE group_id = ?1 AND user_id = ?2 AND role != ?3",
                params![group_id, user_id, ROLE_OWNER],
            )?;
        }
        self.cache.delete(&self.cache.key_group_members(group_id));
        Ok(())
    }

    /// Group-level updates: rename (admin/owner), speak flag (admin/owner),
    /// owner transfer (owner only, demote + promote in one transaction).
    pub fn update(
        &self,
        by: i64,
        group_id: i64,
        name: Option<&str>,
        speak_status: Option<i64>,
        owner_id: Option<i64>,
    ) -> Result<()> {
        if name.is_none() && speak_status.is_none() && owner_id.is_none() {
            return Err(Error::Invalid("nothing to update".to_string()));
        }

        let group = self.get(group_id).map_err(|e| e.into_engine())?;
        let editor = self
            .member(group_id, by)
            .map_err(|_| Error::Forbidden("not a group member".to_string()))?;

        if let Some(name) = name {
            if name.is_empty() {
                return Err(Error::Invalid("group name cannot be empty".to_string()));
            }
            if name.chars().count() > GROUP_NAME_LIMIT {
                return Err(Error::Invalid(format!(
                    "group name cannot exceed {GROUP_NAME_LIMIT} characters"
                )));
            }
            if editor.role == ROLE_NORMAL {
                return Err(Error::Forbidden("only admins may rename the group".to_string()));
            }
        }
        if let Some(speak) = speak_status {
            if speak != 0 && speak != 1 {
                return Err(Error::Invalid("'speak_status' must be 0 or 1".to_string()));
            }
            if editor.role == ROLE_NORMAL {
                return Err(Error::Forbidden("only admins may change the speak flag".to_string()));
            }
        }
        if let Some(new_owner) = owner_id {
            if group.owner_id != by {
                return Err(Error::Forbidden("only the owner may transfer ownership".to_string()));
            }
            self.member(group_id, new_owner)
                .map_err(|_| Error::Invalid(format!("user '{new_owner}' is not a group member")))?;
        }

        let now = now_millis();
        {
            let mut conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .map_err(|e| Error::Transient(e.to_string()))?;

            let mut sets: Vec<String> = Vec::new();
            let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
            if let Some(name) = name {
                args.push(Box::new(name.to_string()));
                sets.push(format!("name = ?{}", args.len()));
            }
            if let Some(speak) = speak_status {
                args.push(Box::new(speak));
                sets.push(format!("speak_status = ?{}", args.len()));
            }
            if let Some(new_owner) = owner_id {
                args.push(Box::new(new_owner));
                sets.push(format!("owner_id = ?{}", args.len()));
            }
            args.push(Box::new(by));
            sets.push(format!("updater_id = ?{}", args.len()));
            args.push(Box::new(now));
            sets.push(format!("updated_at = ?{}", args.len()));
            args.push(Box::new(group_id));

            let sql = format!(
                "UPDATE groups SET {} WHERE id = ?{}",
                sets.join(", "),
                args.len()
            );
            let refs: Vec<&dyn rusqlite::types::ToSql> =
                args.iter().map(|a| a.as_ref()).collect();
            let changed = tx.execute(&sql, refs.as_slice())?;
            if changed == 0 {
                return Err(Error::Conflict("not change".to_string()));
            }

            if let Some(new_owner) = owner_id {
                tx.execute(
                    "UPDATE group_member SET role = ?1, updater_id = ?2, updated_at = ?3
                     WHERE group_id = ?4 AND role = ?5",
                    params![ROLE_NORMAL, by, now, group_id, ROLE_OWNER],
                )?;
                tx.execute(
                    "UPDATE group_member SET role = ?1, updater_id = ?2, updated_at = ?3
                     WHERE group_id = ?4 AND user_id = ?5",
                    params![ROLE_OWNER, by, now, group_id, new_owner],
                )?;
            }
            tx.commit().map_err(|e| Error::Transient(e.to_string()))?;
        }
        self.cache.delete(&self.cache.key_group(group_id));
        self.cache.delete(&self.cache.key_group_members(group_id));
        Ok(())
    }

    /// Bulk-add members: any member may invite, the cap is checked against
    /// the requested batch, existing members and non-active users are
    /// filtered out, and the insert ignores races on the unique pair.
    pub fn add_members(&self, by: i64, group_id: i64, user_ids: &[i64]) -> Result<i64> {
        if user_ids.is_empty() {
            return Err(Error::Invalid("'user_ids' cannot be empty".to_string()));
        }
        let group = self.get(group_id).map_err(|e| e.into_engine())?;
        self.member(group_id, by)
            .map_err(|_| Error::Forbidden("not a group member".to_string()))?;

        let count = self.member_count(group_id)?;
        if count + user_ids.len() as i64 > group.max_member {
            return Err(Error::Conflict("group is full".to_string()));
        }

        let existing = self.member_ids(group_id)?;
        let novel: Vec<i64> = user_ids
            .iter()
            .copied()
            .filter(|id| !existing.contains(id))
            .collect();
        if novel.is_empty() {
            return Ok(0);
        }

        let users = self.users.get_many(&novel).map_err(|e| e.into_engine())?;
        let eligible: Vec<i64> = users
            .iter()
            .filter(|u| u.status == USER_STATUS_ACTIVE)
            .map(|u| u.id)
            .collect();
        if eligible.is_empty() {
            return Ok(0);
        }

        let now = now_millis();
        let inserted = {
            let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            insert_members(&conn, group_id, &eligible, by, now)?
        };
        self.cache.delete(&self.cache.key_group_members(group_id));
        Ok(inserted)
    }

    /// Per-member updates. Role changes are owner-only and never create or
    /// touch an owner; admins cannot mute their peers or the owner;
    /// promotion to admin implies speak permission.
    pub fn update_member(
        &self,
        by: i64,
        group_id: i64,
        user_id: i64,
        role: Option<i64>,
        speak_status: Option<i64>,
    ) -> Result<()> {
        if by == user_id {
            return Err(Error::Invalid("cannot modify yourself".to_string()));
        }
        if role.is_none() && speak_status.is_none() {
            return Err(Error::Invalid("nothing to update".to_string()));
        }

        let editor = self
            .member(group_id, by)
            .map_err(|_| Error::Forbidden("not a group member".to_string()))?;
        let target = self
            .member(group_id, user_id)
            .map_err(|_| Error::Invalid("target is not a group member".to_string()))?;

        if editor.role == ROLE_NORMAL {
            return Err(Error::Forbidden("no permission".to_string()));
        }
        if target.role == ROLE_OWNER {
            return Err(Error::Forbidden("the owner cannot be modified".to_string()));
        }
        if editor.role == ROLE_ADMIN && target.role == ROLE_ADMIN {
            return Err(Error::Forbidden("admins cannot modify other admins".to_string()));
        }

        let mut role = role;
        let mut speak_status = speak_status;
        if let Some(new_role) = role {
            if new_role != ROLE_NORMAL && new_role != ROLE_ADMIN {
                return Err(Error::Invalid("'role' must be 0 or 2".to_string()));
            }
            if editor.role != ROLE_OWNER {
                return Err(Error::Forbidden("only the owner may change roles".to_string()));
            }
            // A fresh admin always gets its voice back.
            if new_role == ROLE_ADMIN {
                speak_status = Some(1);
            }
            role = Some(new_role);
        }
        if let Some(speak) = speak_status {
            if speak != 0 && speak != 1 {
                return Err(Error::Invalid("'speak_status' must be 0 or 1".to_string()));
            }
            let target_will_be_admin =
                target.role == ROLE_ADMIN || role == Some(ROLE_ADMIN);
            if speak == 0 && target_will_be_admin {
                return Err(Error::Forbidden("admins cannot be muted".to_string()));
            }
        }

        let now = now_millis();
        {
            let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.execute(
                "UPDATE group_member
                 SET role = COALESCE(?1, role),
                     speak_status = COALESCE(?2, speak_status),
                     updater_id = ?3, updated_at = ?4
                 WHERE group_id = ?5 AND user_id = ?6",
                params![role, speak_status, by, now, group_id, user_id],
            )?;
        }
        self.cache.delete(&self.cache.key_group_members(group_id));
        Ok(())
    }

    /// Remove members: admins may remove normals, the owner may also remove
    /// admins, and nobody removes the owner. Returns how many rows went.
    pub fn remove_members(&self, by: i64, group_id: i64, user_ids: &[i64]) -> Result<i64> {
        if user_ids.is_empty() {
            return Err(Error::Invalid("'user_ids' cannot be empty".to_string()));
        }
        let editor = self
            .member(group_id, by)
            .map_err(|_| Error::Forbidden("not a group member".to_string()))?;
        if editor.role == ROLE_NORMAL {
            return Err(Error::Forbidden("no permission".to_string()));
        }
        let removable_roles: &[i64] = if editor.role == ROLE_OWNER {
            &[ROLE_NORMAL, ROLE_ADMIN]
        } else {
            &[ROLE_NORMAL]
        };

        let removed = {
            let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            let id_list = user_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let role_list = removable_roles
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(",");
            conn.execute(
                &format!(
                    "DELETE FROM group_member
                     WHERE group_id = ?1 AND user_id IN ({id_list})
                       AND role IN ({role_list}) AND role != {ROLE_OWNER}"
                ),
                params![group_id],
            )?
        };
        self.cache.delete(&self.cache.key_group_members(group_id));
        Ok(removed as i64)
    }
}

fn insert_members(
    conn: &Connection,
    group_id: i64,
    user_ids: &[i64],
    creator: i64,
    now: i64,
) -> Result<i64> {
    let mut inserted = 0;
    for user_id in user_ids {
        inserted += conn.execute(
            "INSERT OR IGNORE INTO group_member
                 (group_id, user_id, role, speak_status, creator_id, created_at,
                  updater_id, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?4, ?5)",
            params![group_id, user_id, ROLE_NORMAL, creator, now],
        )?;
    }
    Ok(inserted as i64)
}
