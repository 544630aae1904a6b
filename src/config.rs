// Configuration for the storage engine
//
// Configuration is loaded in order of precedence:
// 1. Environment variables (highest priority)
// 2. Config file (~/.config/chatstore/config.toml)
// 3. Built-in defaults (lowest priority)

use serde::Deserialize;
use std::path::PathBuf;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the SQLite durable store file
    pub db_path: PathBuf,

    /// Worker id folded into generated message/session ids (0-1023)
    pub worker_id: u64,

    /// How often the Memory Store flushes dirty messages to the durable store
    pub snapshot_interval: std::time::Duration,

    /// How often the Write Buffer flushes queued session/message writes
    pub flush_interval: std::time::Duration,

    /// Max size of the durable store's read-only connection pool
    pub reader_pool_size: u32,

    /// Default retention window (hours) applied to channels created without
    /// an explicit override
    pub retention_hours_default: i64,

    /// Age (days) past which a soft-deleted message is hard-deleted on the
    /// next snapshot tick
    pub hard_delete_after_days: i64,
}

/// Config file structure (subset of EngineConfig that makes sense to persist)
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    db_path: Option<String>,
    worker_id: Option<u64>,
    snapshot_interval_secs: Option<u64>,
    flush_interval_secs: Option<u64>,
    reader_pool_size: Option<u32>,
    retention_hours_default: Option<i64>,
    hard_delete_after_days: Option<i64>,
}

impl EngineConfig {
    /// Get the config file path: ~/.config/chatstore/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("chatstore").join("config.toml"))
    }

    /// Create config file with defaults if it doesn't exist
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        if path.exists() {
            return;
        }

        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return; // config is optional
            }
        }

        let template = Self::default().to_toml();
        let _ = std::fs::write(&path, template);
    }

    /// Load file config if it exists
    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse {}: {}", path.display(), e);
                FileConfig::default()
            }),
            Err(_) => FileConfig::default(),
        }
    }

    /// Serialize config to TOML string (single source of truth for format)
    pub fn to_toml(&self) -> String {
        format!(
            r#"# chatstore configuration

# Path to the SQLite durable store
db_path = "{db_path}"

# Worker id folded into generated ids (0-1023, must be unique per process
# when running more than one engine instance against the same epoch)
worker_id = {worker_id}

# How often dirty messages are flushed from memory to disk (seconds)
snapshot_interval_secs = {snapshot_interval_secs}

# How often buffered session/message writes are flushed (seconds)
flush_interval_secs = {flush_interval_secs}

# Max size of the durable store's reader connection pool
reader_pool_size = {reader_pool_size}

# Default retention window (hours) for channels without an override
retention_hours_default = {retention_hours_default}

# Days after soft-delete before a message is hard-deleted
hard_delete_after_days = {hard_delete_after_days}
"#,
            db_path = self.db_path.display(),
            worker_id = self.worker_id,
            snapshot_interval_secs = self.snapshot_interval.as_secs(),
            flush_interval_secs = self.flush_interval.as_secs(),
            reader_pool_size = self.reader_pool_size,
            retention_hours_default = self.retention_hours_default,
            hard_delete_after_days = self.hard_delete_after_days,
        )
    }

    /// Save current configuration to file
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = Self::config_path() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config path",
            ));
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&path, self.to_toml())
    }

    /// Load configuration: env vars -> file -> defaults
    pub fn from_env() -> Self {
        let file = Self::load_file_config();
        let defaults = Self::default();

        let db_path = std::env::var("CHATSTORE_DB_PATH")
            .ok()
            .or(file.db_path)
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let worker_id = std::env::var("CHATSTORE_WORKER_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.worker_id)
            .unwrap_or(defaults.worker_id);

        let snapshot_interval = std::env::var("CHATSTORE_SNAPSHOT_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.snapshot_interval_secs)
            .map(std::time::Duration::from_secs)
            .unwrap_or(defaults.snapshot_interval);

        let flush_interval = std::env::var("CHATSTORE_FLUSH_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.flush_interval_secs)
            .map(std::time::Duration::from_secs)
            .unwrap_or(defaults.flush_interval);

        let reader_pool_size = std::env::var("CHATSTORE_READER_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.reader_pool_size)
            .unwrap_or(defaults.reader_pool_size);

        let retention_hours_default = std::env::var("CHATSTORE_RETENTION_HOURS_DEFAULT")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.retention_hours_default)
            .unwrap_or(defaults.retention_hours_default);

        let hard_delete_after_days = std::env::var("CHATSTORE_HARD_DELETE_AFTER_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.hard_delete_after_days)
            .unwrap_or(defaults.hard_delete_after_days);

        Self {
            db_path,
            worker_id,
            snapshot_interval,
            flush_interval,
            reader_pool_size,
            retention_hours_default,
            hard_delete_after_days,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./chatstore.sqlite3"),
            worker_id: 0,
            snapshot_interval: std::time::Duration::from_secs(30),
            flush_interval: std::time::Duration::from_millis(500),
            reader_pool_size: 4,
            retention_hours_default: 168,
            hard_delete_after_days: 7,
        }
    }
}
