//! The Memory Store: the authoritative live entity maps and their
//! secondary indexes.
//!
//! One `RwLock<MemoryState>` guards everything. Readers take a shared lock;
//! writers take an exclusive lock; entity *copies* leave the lock, never
//! references, following the teacher's `RwLock`-guarded shared-state idiom
//! (`mira-chat/session/mod.rs`'s `touched_files: RwLock<Vec<String>>`). The
//! per-message `reply_count` is the one exception: it's an `AtomicU32`
//! inside the map entry, readable without promoting the lock to write mode.

pub mod snapshot;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{EntityKind, Result, StoreError};
use crate::id::IdGenerator;
use crate::model::{
    Channel, CreateSessionRequest, Message, MessageVersion, PostMessageRequest, Session,
    VersionType,
};
use crate::util::now_ms;

struct MemoryState {
    channels: HashMap<i64, Channel>,
    channels_by_name: HashMap<String, i64>,
    sessions: HashMap<i64, Session>,
    sessions_by_user: HashMap<i64, HashSet<i64>>,
    messages: HashMap<i64, Message>,
    messages_by_channel: HashMap<i64, Vec<i64>>,
    messages_by_parent: HashMap<i64, Vec<i64>>,
    messages_by_thread: HashMap<i64, Vec<i64>>,
    dirty: BTreeSet<i64>,
    pending_versions: Vec<MessageVersion>,
}

impl MemoryState {
    fn empty() -> Self {
        Self {
            channels: HashMap::new(),
            channels_by_name: HashMap::new(),
            sessions: HashMap::new(),
            sessions_by_user: HashMap::new(),
            messages: HashMap::new(),
            messages_by_channel: HashMap::new(),
            messages_by_parent: HashMap::new(),
            messages_by_thread: HashMap::new(),
            dirty: BTreeSet::new(),
            pending_versions: Vec::new(),
        }
    }
}

pub struct MemoryStore {
    state: RwLock<MemoryState>,
    id_gen: Arc<IdGenerator>,
}

impl MemoryStore {
    pub fn new(id_gen: Arc<IdGenerator>) -> Self {
        Self {
            state: RwLock::new(MemoryState::empty()),
            id_gen,
        }
    }

    /// Populates the store from a recovery scan: channel list plus every
    /// live (non-deleted) message, ascending by `created_at`. Rebuilds the
    /// secondary indexes and recomputes `reply_count` from live
    /// parent/child relationships — the durable store never persists the
    /// counter itself.
    pub fn load_from_recovery(&self, channels: Vec<Channel>, messages: Vec<Message>) {
        let mut state = self.state.write().expect("memory store lock poisoned");

        for channel in channels {
            state.channels_by_name.insert(channel.name.clone(), channel.id);
            state.channels.insert(channel.id, channel);
        }

        let mut reply_counts: HashMap<i64, u32> = HashMap::new();
        for m in &messages {
            if let Some(parent_id) = m.parent_id {
                *reply_counts.entry(parent_id).or_insert(0) += 1;
            }
        }

        for mut m in messages {
            if let Some(count) = reply_counts.get(&m.id) {
                m.reply_count = AtomicU32::new(*count);
            }
            state
                .messages_by_channel
                .entry(m.channel_id)
                .or_default()
                .push(m.id);
            if let Some(parent_id) = m.parent_id {
                state.messages_by_parent.entry(parent_id).or_default().push(m.id);
            }
            if let Some(thread_root_id) = m.thread_root_id {
                state
                    .messages_by_thread
                    .entry(thread_root_id)
                    .or_default()
                    .push(m.id);
            }
            state.messages.insert(m.id, m);
        }

        for ids in state.messages_by_channel.values_mut() {
            ids.sort_unstable();
        }
        for ids in state.messages_by_parent.values_mut() {
            ids.sort_unstable();
        }
        for ids in state.messages_by_thread.values_mut() {
            ids.sort_unstable();
        }

        debug!(
            channels = state.channels.len(),
            messages = state.messages.len(),
            "memory store populated from recovery"
        );
    }

    // ---- sessions -------------------------------------------------------

    pub fn create_session(&self, req: CreateSessionRequest) -> Session {
        let now = now_ms();
        let session = Session {
            id: self.id_gen.next(),
            user_id: req.user_id,
            nickname: req.nickname,
            connection_type: req.connection_type,
            connected_at: now,
            last_activity: now,
        };
        self.insert_session(session.clone());
        session
    }

    /// Inserts an already-materialized session (used by the Write Buffer
    /// after its flush commits, to keep the in-memory view consistent with
    /// what was just durably written).
    pub fn insert_session(&self, session: Session) {
        let mut state = self.state.write().expect("memory store lock poisoned");
        if let Some(user_id) = session.user_id {
            state.sessions_by_user.entry(user_id).or_default().insert(session.id);
        }
        state.sessions.insert(session.id, session);
    }

    pub fn get_session(&self, id: i64) -> Result<Session> {
        let state = self.state.read().expect("memory store lock poisoned");
        state
            .sessions
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityKind::Session, id))
    }

    pub fn update_session_activity(&self, id: i64, at: i64) -> Result<()> {
        let mut state = self.state.write().expect("memory store lock poisoned");
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or(StoreError::NotFound(EntityKind::Session, id))?;
        session.last_activity = at;
        Ok(())
    }

    pub fn update_session_nickname(&self, id: i64, nickname: String) -> Result<()> {
        let mut state = self.state.write().expect("memory store lock poisoned");
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or(StoreError::NotFound(EntityKind::Session, id))?;
        session.nickname = nickname;
        Ok(())
    }

    pub fn delete_session(&self, id: i64) -> Result<()> {
        let mut state = self.state.write().expect("memory store lock poisoned");
        let session = state
            .sessions
            .remove(&id)
            .ok_or(StoreError::NotFound(EntityKind::Session, id))?;
        if let Some(user_id) = session.user_id {
            if let Some(set) = state.sessions_by_user.get_mut(&user_id) {
                set.remove(&id);
                if set.is_empty() {
                    state.sessions_by_user.remove(&user_id);
                }
            }
        }
        Ok(())
    }

    /// Sessions whose `last_activity` falls within `window_seconds` of now,
    /// across all users.
    pub fn get_active_sessions(&self, window_seconds: i64) -> Vec<Session> {
        let state = self.state.read().expect("memory store lock poisoned");
        let cutoff = now_ms() - window_seconds * 1000;
        state
            .sessions
            .values()
            .filter(|s| s.last_activity >= cutoff)
            .cloned()
            .collect()
    }

    // ---- channels ---------------------------------------------------

    pub fn list_channels(&self) -> Vec<Channel> {
        let state = self.state.read().expect("memory store lock poisoned");
        let mut channels: Vec<Channel> = state.channels.values().cloned().collect();
        channels.sort_by_key(|c| c.id);
        channels
    }

    pub fn get_channel(&self, id: i64) -> Result<Channel> {
        let state = self.state.read().expect("memory store lock poisoned");
        state
            .channels
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityKind::Channel, id))
    }

    pub fn get_channel_by_name(&self, name: &str) -> Option<Channel> {
        let state = self.state.read().expect("memory store lock poisoned");
        state
            .channels_by_name
            .get(name)
            .and_then(|id| state.channels.get(id))
            .cloned()
    }

    // ---- messages ---------------------------------------------------

    pub fn post_message(&self, req: PostMessageRequest) -> Result<Message> {
        let mut state = self.state.write().expect("memory store lock poisoned");

        let thread_root_id = match req.parent_id {
            Some(parent_id) => {
                let parent = state
                    .messages
                    .get(&parent_id)
                    .ok_or(StoreError::ParentNotFound(parent_id))?;
                Some(parent.thread_root_id.unwrap_or(parent.id))
            }
            None => None,
        };

        let id = self.id_gen.next();
        let now = now_ms();
        let message = Message {
            id,
            channel_id: req.channel_id,
            subchannel_id: req.subchannel_id,
            parent_id: req.parent_id,
            thread_root_id,
            author_user_id: req.author_user_id,
            author_nickname: req.author_nickname.clone(),
            content: req.content.clone(),
            created_at: now,
            edited_at: None,
            deleted_at: None,
            reply_count: AtomicU32::new(0),
        };

        if let Some(parent_id) = req.parent_id {
            if let Some(parent) = state.messages.get(&parent_id) {
                parent.reply_count.fetch_add(1, Ordering::Relaxed);
            }
            state.messages_by_parent.entry(parent_id).or_default().push(id);
        }
        if let Some(root_id) = thread_root_id {
            state.messages_by_thread.entry(root_id).or_default().push(id);
        }
        state.messages_by_channel.entry(req.channel_id).or_default().push(id);

        let version = MessageVersion {
            id: self.id_gen.next(),
            message_id: id,
            content: req.content,
            author_nickname: req.author_nickname,
            created_at: now,
            version_type: VersionType::Created,
        };
        state.pending_versions.push(version);
        state.dirty.insert(id);

        let copy = message.clone();
        state.messages.insert(id, message);
        Ok(copy)
    }

    pub fn get_message(&self, id: i64) -> Result<Message> {
        let state = self.state.read().expect("memory store lock poisoned");
        state
            .messages
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityKind::Message, id))
    }

    /// Root messages of a channel (`parent_id.is_none()`), ascending id
    /// order — id order equals `created_at` order by construction. This is
    /// the one ordering contract this store exposes; there is no
    /// newest-first variant. `from_id` is a pagination cursor: only messages
    /// with `id > from_id` are returned.
    pub fn get_root_messages(
        &self,
        channel_id: i64,
        from_id: i64,
        subchannel_id: Option<i64>,
        limit: usize,
    ) -> Vec<Message> {
        let state = self.state.read().expect("memory store lock poisoned");
        state
            .messages_by_channel
            .get(&channel_id)
            .into_iter()
            .flatten()
            .filter(|id| **id > from_id)
            .filter_map(|id| state.messages.get(id))
            .filter(|m| m.parent_id.is_none())
            .filter(|m| m.deleted_at.is_none())
            .filter(|m| subchannel_id.is_none() || m.subchannel_id == subchannel_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_replies(&self, parent_id: i64) -> Result<Vec<Message>> {
        let state = self.state.read().expect("memory store lock poisoned");
        if !state.messages.contains_key(&parent_id) {
            return Err(StoreError::NotFound(EntityKind::Message, parent_id));
        }
        Ok(state
            .messages_by_parent
            .get(&parent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.messages.get(id))
            .filter(|m| m.deleted_at.is_none())
            .cloned()
            .collect())
    }

    pub fn get_thread_messages(&self, thread_root_id: i64) -> Vec<Message> {
        let state = self.state.read().expect("memory store lock poisoned");
        state
            .messages_by_thread
            .get(&thread_root_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.messages.get(id))
            .filter(|m| m.deleted_at.is_none())
            .cloned()
            .collect()
    }

    /// Reads the reply counter directly, without promoting the lock to
    /// write mode — the whole reason it's an `AtomicU32` rather than a
    /// plain field.
    pub fn count_replies(&self, message_id: i64) -> Result<u32> {
        let state = self.state.read().expect("memory store lock poisoned");
        state
            .messages
            .get(&message_id)
            .map(|m| m.reply_count())
            .ok_or(StoreError::NotFound(EntityKind::Message, message_id))
    }

    /// The single authoritative soft-delete path: requires the message
    /// exists and isn't already deleted, sets `deleted_at`, rewrites
    /// `content` to `[deleted by ~<nickname>]`, decrements the parent's
    /// reply counter (if any, and only if it's still above zero), and
    /// appends a `deleted` `MessageVersion`, all under one exclusive lock
    /// acquisition. No ownership check — any caller holding `(id, nickname)`
    /// may delete.
    pub fn soft_delete_message(&self, message_id: i64, nickname: &str) -> Result<()> {
        let mut state = self.state.write().expect("memory store lock poisoned");
        let message = state
            .messages
            .get_mut(&message_id)
            .ok_or(StoreError::NotFound(EntityKind::Message, message_id))?;

        if message.is_deleted() {
            return Err(StoreError::AlreadyDeleted(message_id));
        }

        let now = now_ms();
        let rewritten = format!("[deleted by ~{}]", nickname);
        message.content = rewritten.clone();
        message.deleted_at = Some(now);
        let parent_id = message.parent_id;

        let version = MessageVersion {
            id: self.id_gen.next(),
            message_id,
            content: rewritten,
            author_nickname: nickname.to_string(),
            created_at: now,
            version_type: VersionType::Deleted,
        };
        state.pending_versions.push(version);
        state.dirty.insert(message_id);

        if let Some(parent_id) = parent_id {
            if let Some(parent) = state.messages.get(&parent_id) {
                let _ = parent
                    .reply_count
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                        if c > 0 {
                            Some(c - 1)
                        } else {
                            None
                        }
                    });
            }
        }

        Ok(())
    }

    pub fn update_message(
        &self,
        message_id: i64,
        caller_user_id: Option<i64>,
        new_content: String,
    ) -> Result<Message> {
        let mut state = self.state.write().expect("memory store lock poisoned");
        let message = state
            .messages
            .get_mut(&message_id)
            .ok_or(StoreError::NotFound(EntityKind::Message, message_id))?;

        if message.is_deleted() {
            return Err(StoreError::CannotEditDeleted);
        }
        if message.author_user_id.is_none() {
            return Err(StoreError::CannotEditAnonymous);
        }
        if message.author_user_id != caller_user_id {
            return Err(StoreError::NotOwned(message_id));
        }

        let now = now_ms();
        message.content = new_content.clone();
        message.edited_at = Some(now);

        let version = MessageVersion {
            id: self.id_gen.next(),
            message_id,
            content: new_content,
            author_nickname: message.author_nickname.clone(),
            created_at: now,
            version_type: VersionType::Edited,
        };
        state.pending_versions.push(version);
        state.dirty.insert(message_id);

        Ok(message.clone())
    }

    /// Applies a message already assigned an id by the Write Buffer, after
    /// its flush has committed the message (and its `created`
    /// `MessageVersion`) durably in the same transaction. Mirrors
    /// `post_message`'s indexing but does not mint new ids, and does NOT
    /// mark the message dirty or queue another copy of its version row —
    /// both already reached the durable store in the buffer's own flush
    /// transaction, so re-queuing here would double-insert the version on
    /// the next snapshot tick.
    pub(crate) fn apply_buffered_message(&self, message: Message) {
        let mut state = self.state.write().expect("memory store lock poisoned");

        if let Some(parent_id) = message.parent_id {
            if let Some(parent) = state.messages.get(&parent_id) {
                parent.reply_count.fetch_add(1, Ordering::Relaxed);
            }
            state.messages_by_parent.entry(parent_id).or_default().push(message.id);
        }
        if let Some(root_id) = message.thread_root_id {
            state.messages_by_thread.entry(root_id).or_default().push(message.id);
        }
        state.messages_by_channel.entry(message.channel_id).or_default().push(message.id);

        state.messages.insert(message.id, message);
    }

    // ---- snapshot plumbing (see memory::snapshot) ------------------------

    pub(crate) fn drain_dirty_for_snapshot(&self) -> (Vec<Message>, Vec<MessageVersion>) {
        let state = self.state.read().expect("memory store lock poisoned");
        let messages: Vec<Message> = state
            .dirty
            .iter()
            .filter_map(|id| state.messages.get(id))
            .cloned()
            .collect();
        (messages, state.pending_versions.clone())
    }

    pub(crate) fn clear_dirty(&self, flushed_ids: &[i64]) {
        let mut state = self.state.write().expect("memory store lock poisoned");
        for id in flushed_ids {
            state.dirty.remove(id);
        }
        state.pending_versions.clear();
    }

    /// Ids of soft-deleted messages past the hard-delete cutoff, for the
    /// snapshot loop to purge from both memory and the durable store.
    pub(crate) fn collect_hard_delete_candidates(&self, cutoff_ms: i64) -> Vec<i64> {
        let state = self.state.read().expect("memory store lock poisoned");
        state
            .messages
            .values()
            .filter(|m| m.deleted_at.map(|d| d < cutoff_ms).unwrap_or(false))
            .map(|m| m.id)
            .collect()
    }

    pub(crate) fn hard_delete(&self, ids: &[i64]) {
        let mut state = self.state.write().expect("memory store lock poisoned");
        for &id in ids {
            if let Some(message) = state.messages.remove(&id) {
                if let Some(v) = state.messages_by_channel.get_mut(&message.channel_id) {
                    v.retain(|x| *x != id);
                }
                if let Some(parent_id) = message.parent_id {
                    if let Some(v) = state.messages_by_parent.get_mut(&parent_id) {
                        v.retain(|x| *x != id);
                    }
                }
                if let Some(root_id) = message.thread_root_id {
                    if let Some(v) = state.messages_by_thread.get_mut(&root_id) {
                        v.retain(|x| *x != id);
                    }
                }
            }
            state.dirty.remove(&id);
        }
    }
}
