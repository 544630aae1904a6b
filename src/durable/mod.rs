//! The durable (SQLite) store.
//!
//! One exclusive writer `Connection`, guarded by a `Mutex` following
//! `lifestats.rs`'s dedicated-writer discipline, plus an `r2d2`-pooled set
//! of reader connections following `cortex_query/mod.rs`. All mutation
//! happens on the writer connection inside a transaction; reads for
//! long-lived query surfaces (none exist on the hot path here — the Memory
//! Store answers all reads after recovery) would go through the pool.

pub mod migrations;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU32;
use std::sync::Mutex;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::id::IdGenerator;
use crate::model::{Channel, ChannelType, ConnectionType, Message, MessageVersion, Session, VersionType};

/// Rows accumulated from one Write Buffer flush tick, already assigned
/// final ids by the caller (the Write Buffer owns the `IdGenerator`).
#[derive(Default)]
pub struct FlushBatch {
    pub session_creates: Vec<Session>,
    pub activity_updates: HashMap<i64, i64>,
    pub nickname_updates: HashMap<i64, String>,
    pub deletions: HashSet<i64>,
    pub message_inserts: Vec<Message>,
    pub message_versions: Vec<MessageVersion>,
}

impl FlushBatch {
    pub fn is_empty(&self) -> bool {
        self.session_creates.is_empty()
            && self.activity_updates.is_empty()
            && self.nickname_updates.is_empty()
            && self.deletions.is_empty()
            && self.message_inserts.is_empty()
    }
}

const UPSERT_CHUNK_SIZE: usize = 500;
const DEFAULT_CHANNEL_RETENTION_HOURS: i64 = 168;
const DEFAULT_CHANNELS: &[(&str, &str, &str)] = &[
    ("general", "#general", "General discussion"),
    ("tech", "#tech", "Technical topics"),
    ("random", "#random", "Off-topic chat"),
    ("feedback", "#feedback", "Bug reports and feature requests"),
];

pub struct DurableStore {
    writer: Mutex<Connection>,
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
}

impl DurableStore {
    /// Opens (creating if absent) the database at `path`, applies any
    /// pending migrations on the writer connection, and builds the reader
    /// pool.
    pub fn open(path: impl AsRef<Path>, reader_pool_size: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut writer_conn = Connection::open(&path)?;
        apply_pragmas(&writer_conn)?;
        migrations::apply(&mut writer_conn, &path)?;

        // WAL mode is a database-file-level property set once by the writer
        // connection above; reader connections observe it without needing
        // their own pragma statement.
        let manager = SqliteConnectionManager::file(&path);
        let pool = Pool::builder()
            .max_size(reader_pool_size.max(1))
            .build(manager)
            .map_err(StoreError::Pool)?;

        info!(path = %path.display(), "durable store opened");

        Ok(Self {
            writer: Mutex::new(writer_conn),
            pool,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the four default channels if the table is empty. Called
    /// once by the engine facade after migration, before the recovery scan.
    pub fn ensure_default_channels(&self, id_gen: &IdGenerator) -> Result<()> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM channels", [], |r| r.get(0))?;
        if count > 0 {
            return Ok(());
        }

        let now = now_ms();
        for (name, display_name, description) in DEFAULT_CHANNELS {
            let id = id_gen.next();
            conn.execute(
                "INSERT INTO channels (id, name, display_name, description, channel_type, message_retention_hours, created_by, created_at, is_private)
                 VALUES (?1, ?2, ?3, ?4, 'chat', ?5, NULL, ?6, 0)",
                params![id, name, display_name, description, DEFAULT_CHANNEL_RETENTION_HOURS, now],
            )?;
        }
        info!("created default channels");
        Ok(())
    }

    pub fn list_channels(&self) -> Result<Vec<Channel>> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, name, display_name, description, channel_type, message_retention_hours, created_by, created_at, is_private
             FROM channels ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_channel)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Single ascending-`created_at` scan over all non-deleted messages.
    /// The only read done at startup, before any concurrent traffic exists.
    pub fn scan_live_messages(&self) -> Result<Vec<Message>> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, channel_id, subchannel_id, parent_id, thread_root_id, author_user_id,
                    author_nickname, content, created_at, edited_at, deleted_at
             FROM messages WHERE deleted_at IS NULL ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(count = rows.len(), "recovery scan complete");
        Ok(rows)
    }

    /// `INSERT ... ON CONFLICT(id) DO UPDATE`, chunked to `UPSERT_CHUNK_SIZE`
    /// rows per statement, all within one transaction.
    pub fn batch_upsert_messages(&self, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut conn = self.writer.lock().expect("writer mutex poisoned");
        let tx = conn.unchecked_transaction()?;
        for chunk in messages.chunks(UPSERT_CHUNK_SIZE) {
            for m in chunk {
                tx.execute(
                    "INSERT INTO messages (id, channel_id, subchannel_id, parent_id, thread_root_id,
                        author_user_id, author_nickname, content, created_at, edited_at, deleted_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                     ON CONFLICT(id) DO UPDATE SET
                        content = excluded.content,
                        edited_at = excluded.edited_at,
                        deleted_at = excluded.deleted_at",
                    params![
                        m.id,
                        m.channel_id,
                        m.subchannel_id,
                        m.parent_id,
                        m.thread_root_id,
                        m.author_user_id,
                        m.author_nickname,
                        m.content,
                        m.created_at,
                        m.edited_at,
                        m.deleted_at,
                    ],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn insert_message_versions(&self, versions: &[MessageVersion]) -> Result<()> {
        if versions.is_empty() {
            return Ok(());
        }
        let mut conn = self.writer.lock().expect("writer mutex poisoned");
        let tx = conn.unchecked_transaction()?;
        for v in versions {
            tx.execute(
                "INSERT INTO message_versions (id, message_id, content, author_nickname, created_at, version_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![v.id, v.message_id, v.content, v.author_nickname, v.created_at, v.version_type.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn hard_delete_messages(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.writer.lock().expect("writer mutex poisoned");
        let tx = conn.unchecked_transaction()?;
        {
            let placeholders = vec!["?"; ids.len()].join(",");
            let sql = format!("DELETE FROM messages WHERE id IN ({placeholders})");
            let params: Vec<&dyn rusqlite::ToSql> =
                ids.iter().map(|i| i as &dyn rusqlite::ToSql).collect();
            tx.execute(&sql, params.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Runs the full Write Buffer flush transaction: session creates,
    /// activity updates, nickname updates, deletions, then message inserts
    /// (and their accompanying `created` MessageVersion rows) — all in one
    /// transaction on the writer connection.
    pub fn flush_writes(&self, batch: &FlushBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.writer.lock().expect("writer mutex poisoned");
        let tx = conn.unchecked_transaction()?;

        for s in &batch.session_creates {
            tx.execute(
                "INSERT INTO sessions (id, user_id, nickname, connection_type, connected_at, last_activity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![s.id, s.user_id, s.nickname, s.connection_type.as_str(), s.connected_at, s.last_activity],
            )?;
        }

        for (&id, &last_activity) in &batch.activity_updates {
            tx.execute(
                "UPDATE sessions SET last_activity = ?1 WHERE id = ?2",
                params![last_activity, id],
            )?;
        }

        for (id, nickname) in &batch.nickname_updates {
            tx.execute(
                "UPDATE sessions SET nickname = ?1 WHERE id = ?2",
                params![nickname, id],
            )?;
        }

        if !batch.deletions.is_empty() {
            let ids: Vec<i64> = batch.deletions.iter().copied().collect();
            let placeholders = vec!["?"; ids.len()].join(",");
            let sql = format!("DELETE FROM sessions WHERE id IN ({placeholders})");
            let params: Vec<&dyn rusqlite::ToSql> =
                ids.iter().map(|i| i as &dyn rusqlite::ToSql).collect();
            tx.execute(&sql, params.as_slice())?;
        }

        for m in &batch.message_inserts {
            tx.execute(
                "INSERT INTO messages (id, channel_id, subchannel_id, parent_id, thread_root_id,
                    author_user_id, author_nickname, content, created_at, edited_at, deleted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    m.id,
                    m.channel_id,
                    m.subchannel_id,
                    m.parent_id,
                    m.thread_root_id,
                    m.author_user_id,
                    m.author_nickname,
                    m.content,
                    m.created_at,
                    m.edited_at,
                    m.deleted_at,
                ],
            )?;
        }

        for v in &batch.message_versions {
            tx.execute(
                "INSERT INTO message_versions (id, message_id, content, author_nickname, created_at, version_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![v.id, v.message_id, v.content, v.author_nickname, v.created_at, v.version_type.as_str()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Deletes messages older than each channel's retention window and
    /// sessions idle past `session_timeout_ms`. Admin-only; not part of the
    /// hot path.
    pub fn retention_sweep(&self, now_ms: i64, session_timeout_ms: i64) -> Result<(usize, usize)> {
        let conn = self.writer.lock().expect("writer mutex poisoned");

        let messages_deleted = conn.execute(
            "DELETE FROM messages
             WHERE created_at < ?1 - (SELECT message_retention_hours FROM channels WHERE channels.id = messages.channel_id) * 3600000",
            params![now_ms],
        )?;

        let sessions_deleted = conn.execute(
            "DELETE FROM sessions WHERE last_activity < ?1",
            params![now_ms - session_timeout_ms],
        )?;

        Ok((messages_deleted, sessions_deleted))
    }

    pub fn migration_status(&self) -> Result<(i64, i64, Vec<String>)> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        migrations::status(&conn)
    }

    pub fn get_channel_by_name(&self, name: &str) -> Result<Option<Channel>> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        conn.query_row(
            "SELECT id, name, display_name, description, channel_type, message_retention_hours, created_by, created_at, is_private
             FROM channels WHERE name = ?1",
            params![name],
            row_to_channel,
        )
        .optional()
        .map_err(StoreError::from)
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA busy_timeout=5000;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

fn row_to_channel(row: &rusqlite::Row) -> rusqlite::Result<Channel> {
    let channel_type: String = row.get(4)?;
    let is_private: i64 = row.get(8)?;
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        channel_type: ChannelType::parse(&channel_type).unwrap_or(ChannelType::Chat),
        message_retention_hours: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
        is_private: is_private != 0,
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        subchannel_id: row.get(2)?,
        parent_id: row.get(3)?,
        thread_root_id: row.get(4)?,
        author_user_id: row.get(5)?,
        author_nickname: row.get(6)?,
        content: row.get(7)?,
        created_at: row.get(8)?,
        edited_at: row.get(9)?,
        deleted_at: row.get(10)?,
        reply_count: AtomicU32::new(0),
    })
}

#[allow(dead_code)]
fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let connection_type: String = row.get(3)?;
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        nickname: row.get(2)?,
        connection_type: ConnectionType::parse(&connection_type).unwrap_or(ConnectionType::Tcp),
        connected_at: row.get(4)?,
        last_activity: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdGenerator;

    fn open_tmp() -> (tempfile::TempDir, DurableStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatstore.sqlite3");
        let store = DurableStore::open(&path, 4).unwrap();
        (dir, store)
    }

    #[test]
    fn opens_and_migrates_fresh_database() {
        let (_dir, store) = open_tmp();
        let (current, latest, pending) = store.migration_status().unwrap();
        assert_eq!(current, latest);
        assert!(pending.is_empty());
    }

    #[test]
    fn ensure_default_channels_is_idempotent() {
        let (_dir, store) = open_tmp();
        let id_gen = IdGenerator::with_default_epoch(1);
        store.ensure_default_channels(&id_gen).unwrap();
        store.ensure_default_channels(&id_gen).unwrap();
        assert_eq!(store.list_channels().unwrap().len(), 4);
    }

    #[test]
    fn scan_live_messages_excludes_deleted() {
        let (_dir, store) = open_tmp();
        let id_gen = IdGenerator::with_default_epoch(1);
        store.ensure_default_channels(&id_gen).unwrap();
        let channel_id = store.list_channels().unwrap()[0].id;

        let alive = Message {
            id: id_gen.next(),
            channel_id,
            subchannel_id: None,
            parent_id: None,
            thread_root_id: None,
            author_user_id: None,
            author_nickname: "alice".into(),
            content: "hi".into(),
            created_at: 1,
            edited_at: None,
            deleted_at: None,
            reply_count: AtomicU32::new(0),
        };
        let mut deleted = alive.clone();
        deleted.id = id_gen.next();
        deleted.deleted_at = Some(2);

        store.batch_upsert_messages(&[alive, deleted]).unwrap();
        let live = store.scan_live_messages().unwrap();
        assert_eq!(live.len(), 1);
    }
}
