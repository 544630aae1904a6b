//! Typed error taxonomy for the storage engine.
//!
//! The Memory Store's contract requires callers to match on specific error
//! kinds (`NotOwned` vs `NotFound`, etc.), which `anyhow::Error` cannot
//! express — hence `thiserror` here, with `anyhow` reserved for the admin
//! binary's boundary.

use thiserror::Error;

/// Identifies which entity kind a `NotFound` refers to, for logging and
/// caller-side matching without string parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Channel,
    Session,
    Message,
    User,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Channel => "channel",
            EntityKind::Session => "session",
            EntityKind::Message => "message",
            EntityKind::User => "user",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} {1} not found")]
    NotFound(EntityKind, i64),

    #[error("caller does not own message {0}")]
    NotOwned(i64),

    #[error("message {0} is already deleted")]
    AlreadyDeleted(i64),

    #[error("cannot edit a message with no author")]
    CannotEditAnonymous,

    #[error("cannot edit a deleted message")]
    CannotEditDeleted,

    #[error("parent message {0} not found")]
    ParentNotFound(i64),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt state: {0}")]
    Corrupt(String),

    #[error("durable store error: {0}")]
    Durable(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
