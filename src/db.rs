use rusqlite::Connection;
use std::sync::Mutex;

pub struct Db {
    pub conn: Mutex<Connection>,
}

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("Failed to open database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("Failed to set pragmas");
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate();
        db
    }

    fn migrate(&self) {
        let conn = self.conn.lock().unwrap();

        // Relational side: identity, friendship, groups.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                nickname TEXT NOT NULL DEFAULT '',
                avatar TEXT NOT NULL DEFAULT '',
                online_status INTEGER NOT NULL DEFAULT 0,
                status INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_nickname ON users(nickname);

            CREATE TABLE IF NOT EXISTS user_relation (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_a_id INTEGER NOT NULL,
                user_b_id INTEGER NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                block_status INTEGER NOT NULL DEFAULT 0,
                remark_on_a TEXT NOT NULL DEFAULT '',
                remark_on_b TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(user_a_id, user_b_id)
            );

            CREATE TABLE IF NOT EXISTS user_relation_invite (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                target_id INTEGER NOT NULL,
                note TEXT NOT NULL DEFAULT '',
                reply TEXT NOT NULL DEFAULT '',
                status INTEGER NOT NULL DEFAULT 0,
                uq_flag TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_invite_target ON user_relation_invite(target_id, status);

            CREATE TABLE IF NOT EXISTS groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                max_member INTEGER NOT NULL DEFAULT 10,
                owner_id INTEGER NOT NULL,
                speak_status INTEGER NOT NULL DEFAULT 1,
                creator_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updater_id INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS group_member (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                role INTEGER NOT NULL DEFAULT 0,
                speak_status INTEGER NOT NULL DEFAULT 1,
                creator_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updater_id INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(group_id, user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_group_member_user ON group_member(user_id);",
        )
        .expect("Failed to run relational migrations");

        // Chat side: rooms keyed by derived room_id, messages with a
        // per-room monotonic message_id and a JSON body.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rooms (
                room_id TEXT PRIMARY KEY,
                session_type INTEGER NOT NULL,
                last_message_id INTEGER NOT NULL DEFAULT 0,
                last_message TEXT,
                last_message_seq INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                message_id INTEGER NOT NULL,
                room_id TEXT NOT NULL,
                type INTEGER NOT NULL,
                session_type INTEGER NOT NULL,
                sender_id INTEGER NOT NULL,
                receiver_id INTEGER NOT NULL,
                send_status INTEGER NOT NULL DEFAULT 1,
                read_status INTEGER NOT NULL DEFAULT 0,
                status INTEGER NOT NULL DEFAULT 1,
                body TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_room_mid ON messages(room_id, message_id);
            CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id);",
        )
        .expect("Failed to run chat migrations");
    }
}
