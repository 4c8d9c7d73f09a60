use std::sync::Arc;

use rusqlite::params;

use crate::cache::Cache;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::models::*;

const SEARCH_LIMIT: i64 = 20;

const USER_COLUMNS: &str = "id, username, password_hash, nickname, avatar, online_status, \
     status, created_at, updated_at";

pub struct UserEngine {
    db: Arc<Db>,
    cache: Arc<Cache>,
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        nickname: row.get(3)?,
        avatar: row.get(4)?,
        online_status: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl UserEngine {
    pub fn new(db: Arc<Db>, cache: Arc<Cache>) -> Self {
        UserEngine { db, cache }
    }

    /// Register a new active user. The nickname defaults to the username.
    pub fn create(&self, username: &str, password_hash: &str) -> Result<User> {
        let now = now_millis();
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        let result = conn.execute(
            "INSERT INTO users (username, password_hash, nickname, status, created_at, updated_at)
             VALUES (?1, ?2, ?1, ?3, ?4, ?4)",
            params![username, password_hash, USER_STATUS_ACTIVE, now],
        );
        match result {
            Ok(_) => {}
            Err(e) if e.to_string().contains("UNIQUE") => {
                return Err(Error::Conflict("account already exists".to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        let id = conn.last_insert_rowid();
        let user = User {
            id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            nickname: username.to_string(),
            avatar: String::new(),
            online_status: 0,
            status: USER_STATUS_ACTIVE,
            created_at: now,
            updated_at: now,
        };
        drop(conn);
        // Overwrites any empty marker a pre-registration lookup left behind.
        self.cache.set(&self.cache.key_user(id), &user);
        self.cache.set(&self.cache.key_username(username), &user);
        Ok(user)
    }

    pub fn get(&self, id: i64) -> Result<User> {
        let key = self.cache.key_user(id);
        match self.cache.get::<User>(&key) {
            Ok(Some(user)) => return Ok(user),
            Ok(None) => {}
            Err(err) => return Err(err.into_engine()),
        }

        let user = {
            let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                row_to_user,
            )
        };
        match user {
            Ok(user) => {
                self.cache.set(&key, &user);
                self.cache
                    .set(&self.cache.key_username(&user.username), &user);
                Ok(user)
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                self.cache.set_empty(&key);
                Err(Error::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_by_username(&self, username: &str) -> Result<User> {
        let key = self.cache.key_username(username);
        match self.cache.get::<User>(&key) {
            Ok(Some(user)) => return Ok(user),
            Ok(None) => {}
            Err(err) => return Err(err.into_engine()),
        }

        let user = {
            let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                row_to_user,
            )
        };
        match user {
            Ok(user) => {
                self.cache.set(&self.cache.key_user(user.id), &user);
                self.cache.set(&key, &user);
                Ok(user)
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                self.cache.set_empty(&key);
                Err(Error::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Batch fetch, deduplicated, in input order where present.
    pub fn get_many(&self, ids: &[i64]) -> Result<Vec<User>> {
        let mut unique: Vec<i64> = Vec::new();
        for id in ids {
            if !unique.contains(id) {
                unique.push(*id);
            }
        }
        let mut users = Vec::with_capacity(unique.len());
        for id in unique {
            match self.get(id) {
                Ok(user) => users.push(user),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        if users.is_empty() {
            return Err(Error::NotFound);
        }
        Ok(users)
    }

    /// Friend search: by exact id or nickname prefix (`%` escaped).
    pub fn search(&self, user_id: Option<i64>, nickname: Option<&str>) -> Result<Vec<UserPublic>> {
        if user_id.is_none() && nickname.is_none() {
            return Err(Error::Invalid("'user_id' or 'nickname' required".to_string()));
        }

        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut found = Vec::new();
        if let Some(id) = user_id {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE id = ?1 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![id, SEARCH_LIMIT], row_to_user)?;
            for row in rows {
                found.push(row?.public());
            }
        } else if let Some(nick) = nickname {
            let pattern = format!("{}%", nick.replace('%', "\\%"));
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE nickname LIKE ?1 ESCAPE '\\' ORDER BY id ASC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![pattern, SEARCH_LIMIT], row_to_user)?;
            for row in rows {
                found.push(row?.public());
            }
        }
        Ok(found)
    }
}
