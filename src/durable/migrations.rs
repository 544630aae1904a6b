//! Versioned schema migrations for the durable store.
//!
//! Generalizes `lifestats.rs`'s inline `apply_schema_v1`/`migrate_vN_to_vM`
//! ladder into an embedded, file-backed bundle: each `NNN_name.sql` under
//! `durable/migrations/` is compiled into the binary via `include_str!` and
//! applied, in order, inside its own transaction.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::Result;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial",
        sql: include_str!("migrations/001_initial.sql"),
    },
    Migration {
        version: 2,
        name: "add_users",
        sql: include_str!("migrations/002_add_users.sql"),
    },
];

fn ensure_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        );",
    )
}

fn current_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

/// Backs up the database file before applying any pending migration, named
/// `<path>.backup-v<current_version>-<YYYYMMDD-HHMMSS>`. Only runs when the
/// file already existed (a brand-new, empty database has nothing worth
/// backing up, and `copy` would otherwise create a stray zero-byte backup on
/// first run).
fn backup_before_migrating(path: &Path, current: i64) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let backup_path = path.with_file_name(format!(
        "{}.backup-v{}-{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("chatstore.sqlite3"),
        current,
        Utc::now().format("%Y%m%d-%H%M%S"),
    ));
    std::fs::copy(path, &backup_path)?;
    info!(backup = %backup_path.display(), "created pre-migration backup");
    Ok(())
}

/// Ensures the schema at `path` (opened as `conn`) is at the latest known
/// version, applying any pending migrations transactionally. Aborts on the
/// first failing migration, leaving the store at the last successfully
/// applied version and the pre-migration backup intact.
pub fn apply(conn: &mut Connection, path: &Path) -> Result<()> {
    ensure_migrations_table(conn)?;
    let current = current_version(conn)?;

    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|m| m.version > current)
        .collect();

    if pending.is_empty() {
        info!(version = current, "schema up to date");
        return Ok(());
    }

    backup_before_migrating(path, current)?;

    for migration in pending {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, migration.name, now_ms()],
        )?;
        tx.commit().map_err(|e| {
            warn!(version = migration.version, error = %e, "migration failed, aborting");
            e
        })?;
        info!(version = migration.version, name = migration.name, "migration applied");
    }

    Ok(())
}

/// Highest migration version known to this build.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// `(current_version, latest_version, pending_names)` — used by the admin
/// CLI's migration-status subcommand.
pub fn status(conn: &Connection) -> Result<(i64, i64, Vec<String>)> {
    ensure_migrations_table(conn)?;
    let current = current_version(conn)?;
    let pending = MIGRATIONS
        .iter()
        .filter(|m| m.version > current)
        .map(|m| format!("{:03}_{}", m.version, m.name))
        .collect();
    Ok((current, latest_version(), pending))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_migration_creates_a_pre_migration_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatstore.sqlite3");

        {
            let conn = Connection::open(&path).unwrap();
            ensure_migrations_table(&conn).unwrap();
            conn.execute_batch(MIGRATIONS[0].sql).unwrap();
            conn.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![MIGRATIONS[0].version, MIGRATIONS[0].name, now_ms()],
            )
            .unwrap();
        }

        let mut conn = Connection::open(&path).unwrap();
        apply(&mut conn, &path).unwrap();

        let backup_found = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| {
                e.file_name()
                    .to_str()
                    .map(|n| n.contains(".backup-v1-"))
                    .unwrap_or(false)
            });
        assert!(backup_found, "expected a *.backup-v1-* file alongside the database");
    }
}
