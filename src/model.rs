//! Entity types shared by the Memory Store, Durable Store, and Write Buffer.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    Chat,
    Forum,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Chat => "chat",
            ChannelType::Forum => "forum",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(ChannelType::Chat),
            "forum" => Some(ChannelType::Forum),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    Tcp,
    Ssh,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Tcp => "tcp",
            ConnectionType::Ssh => "ssh",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tcp" => Some(ConnectionType::Tcp),
            "ssh" => Some(ConnectionType::Ssh),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionType {
    Created,
    Edited,
    Deleted,
}

impl VersionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionType::Created => "created",
            VersionType::Edited => "edited",
            VersionType::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(VersionType::Created),
            "edited" => Some(VersionType::Edited),
            "deleted" => Some(VersionType::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub channel_type: ChannelType,
    pub message_retention_hours: i64,
    pub created_by: Option<i64>,
    pub created_at: i64,
    pub is_private: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub user_id: Option<i64>,
    pub nickname: String,
    pub connection_type: ConnectionType,
    pub connected_at: i64,
    pub last_activity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageVersion {
    pub id: i64,
    pub message_id: i64,
    pub content: String,
    pub author_nickname: String,
    pub created_at: i64,
    pub version_type: VersionType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub nickname: String,
    pub password_hash: String,
    pub user_flags: i64,
    pub created_at: i64,
    pub last_seen: i64,
}

/// A live message. `reply_count` is an `AtomicU32` rather than a plain field:
/// concurrent readers load it without promoting the store's `RwLock` to
/// write mode. Copies handed out by the Memory Store snapshot the counter's
/// value at copy time via `Clone` (see below) — they do not share the live
/// atomic.
#[derive(Debug)]
pub struct Message {
    pub id: i64,
    pub channel_id: i64,
    pub subchannel_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub thread_root_id: Option<i64>,
    pub author_user_id: Option<i64>,
    pub author_nickname: String,
    pub content: String,
    pub created_at: i64,
    pub edited_at: Option<i64>,
    pub deleted_at: Option<i64>,
    pub reply_count: AtomicU32,
}

impl Clone for Message {
    fn clone(&self) -> Self {
        Message {
            id: self.id,
            channel_id: self.channel_id,
            subchannel_id: self.subchannel_id,
            parent_id: self.parent_id,
            thread_root_id: self.thread_root_id,
            author_user_id: self.author_user_id,
            author_nickname: self.author_nickname.clone(),
            content: self.content.clone(),
            created_at: self.created_at,
            edited_at: self.edited_at,
            deleted_at: self.deleted_at,
            reply_count: AtomicU32::new(self.reply_count.load(Ordering::Relaxed)),
        }
    }
}

impl Message {
    pub fn reply_count(&self) -> u32 {
        self.reply_count.load(Ordering::Relaxed)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Request payload for `postMessage`, shared by the direct Memory Store path
/// and the Write Buffer's message-insert queue.
#[derive(Debug, Clone)]
pub struct PostMessageRequest {
    pub channel_id: i64,
    pub subchannel_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub author_user_id: Option<i64>,
    pub author_nickname: String,
    pub content: String,
}

/// Request payload for `createSession`, shared by the direct path and the
/// Write Buffer's session-creation queue.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub user_id: Option<i64>,
    pub nickname: String,
    pub connection_type: ConnectionType,
}
