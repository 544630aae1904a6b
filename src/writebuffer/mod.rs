//! The Write Buffer: coalesces high-rate session and message writes into
//! one durable-store transaction per flush tick.
//!
//! Five independently-mutexed queues so producers never contend with each
//! other while enqueuing. Grounded in
//! `veza-chat-server/optimized_persistence.rs`'s
//! `periodic_flush_loop`/`batch_processing_loop` split, combined with
//! `lifestats.rs`'s single-transaction batch commit discipline.
//!
//! `createSession` and `postMessage` submitted through the buffer are
//! synchronous from the caller's perspective via a `oneshot` result channel
//! awaited after enqueue; `updateSessionActivity`, `updateSessionNickname`,
//! and `deleteSession` are fire-and-forget.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, error, info};

use crate::durable::{DurableStore, FlushBatch};
use crate::error::{Result, StoreError};
use crate::id::IdGenerator;
use crate::memory::MemoryStore;
use crate::model::{
    CreateSessionRequest, Message, MessageVersion, PostMessageRequest, Session, VersionType,
};
use crate::util::now_ms;

type SessionCreateEntry = (CreateSessionRequest, oneshot::Sender<Result<Session>>);
type MessageInsertEntry = (PostMessageRequest, oneshot::Sender<Result<Message>>);

struct Queues {
    session_creates: Mutex<Vec<SessionCreateEntry>>,
    activity_updates: Mutex<HashMap<i64, i64>>,
    nickname_updates: Mutex<HashMap<i64, String>>,
    deletions: Mutex<HashSet<i64>>,
    message_inserts: Mutex<Vec<MessageInsertEntry>>,
}

impl Queues {
    fn new() -> Self {
        Self {
            session_creates: Mutex::new(Vec::new()),
            activity_updates: Mutex::new(HashMap::new()),
            nickname_updates: Mutex::new(HashMap::new()),
            deletions: Mutex::new(HashSet::new()),
            message_inserts: Mutex::new(Vec::new()),
        }
    }
}

pub struct WriteBuffer {
    queues: Arc<Queues>,
    memory: Arc<MemoryStore>,
    durable: Arc<DurableStore>,
    id_gen: Arc<IdGenerator>,
}

impl WriteBuffer {
    pub fn new(memory: Arc<MemoryStore>, durable: Arc<DurableStore>, id_gen: Arc<IdGenerator>) -> Self {
        Self {
            queues: Arc::new(Queues::new()),
            memory,
            durable,
            id_gen,
        }
    }

    pub async fn create_session(&self, req: CreateSessionRequest) -> Result<Session> {
        let (tx, rx) = oneshot::channel();
        self.queues.session_creates.lock().await.push((req, tx));
        rx.await
            .map_err(|_| StoreError::Corrupt("write buffer dropped session-create awaiter".into()))?
    }

    pub async fn post_message(&self, req: PostMessageRequest) -> Result<Message> {
        let (tx, rx) = oneshot::channel();
        self.queues.message_inserts.lock().await.push((req, tx));
        rx.await
            .map_err(|_| StoreError::Corrupt("write buffer dropped message-insert awaiter".into()))?
    }

    pub async fn update_session_activity(&self, id: i64, at: i64) {
        self.queues.activity_updates.lock().await.insert(id, at);
    }

    pub async fn update_session_nickname(&self, id: i64, nickname: String) {
        self.queues.nickname_updates.lock().await.insert(id, nickname);
    }

    pub async fn delete_session(&self, id: i64) {
        self.queues.deletions.lock().await.insert(id);
    }

    /// Runs until `shutdown` reports `true`, then performs one final flush
    /// and returns.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("write buffer: running final flush before shutdown");
                        self.flush().await;
                        break;
                    }
                }
            }
        }
    }

    async fn flush(&self) {
        let session_creates = std::mem::take(&mut *self.queues.session_creates.lock().await);
        let activity_updates = std::mem::take(&mut *self.queues.activity_updates.lock().await);
        let nickname_updates = std::mem::take(&mut *self.queues.nickname_updates.lock().await);
        let deletions = std::mem::take(&mut *self.queues.deletions.lock().await);
        let message_inserts = std::mem::take(&mut *self.queues.message_inserts.lock().await);

        if session_creates.is_empty()
            && activity_updates.is_empty()
            && nickname_updates.is_empty()
            && deletions.is_empty()
            && message_inserts.is_empty()
        {
            return;
        }

        let now = now_ms();
        let mut batch = FlushBatch::default();

        let mut sessions_by_request: Vec<(Session, oneshot::Sender<Result<Session>>)> = Vec::new();
        for (req, tx) in session_creates {
            let session = Session {
                id: self.id_gen.next(),
                user_id: req.user_id,
                nickname: req.nickname,
                connection_type: req.connection_type,
                connected_at: now,
                last_activity: now,
            };
            batch.session_creates.push(session.clone());
            sessions_by_request.push((session, tx));
        }

        batch.activity_updates = activity_updates.clone();
        batch.nickname_updates = nickname_updates.clone();
        batch.deletions = deletions.clone();

        let mut messages_by_request: Vec<(Message, oneshot::Sender<Result<Message>>)> = Vec::new();
        let mut rejected: Vec<(oneshot::Sender<Result<Message>>, StoreError)> = Vec::new();
        for (req, tx) in message_inserts {
            let thread_root_id = match req.parent_id {
                Some(parent_id) => match self.memory.get_message(parent_id) {
                    Ok(parent) => Some(parent.thread_root_id.unwrap_or(parent.id)),
                    Err(_) => {
                        rejected.push((tx, StoreError::ParentNotFound(parent_id)));
                        continue;
                    }
                },
                None => None,
            };

            let id = self.id_gen.next();
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
                reply_count: std::sync::atomic::AtomicU32::new(0),
            };
            batch.message_inserts.push(message.clone());
            batch.message_versions.push(MessageVersion {
                id: self.id_gen.next(),
                message_id: id,
                content: req.content,
                author_nickname: req.author_nickname,
                created_at: now,
                version_type: VersionType::Created,
            });
            messages_by_request.push((message, tx));
        }

        for (tx, e) in rejected {
            let _ = tx.send(Err(e));
        }

        debug!(
            sessions = batch.session_creates.len(),
            messages = batch.message_inserts.len(),
            "write buffer: flushing"
        );

        match self.durable.flush_writes(&batch) {
            Ok(()) => {
                for session in &batch.session_creates {
                    self.memory.insert_session(session.clone());
                }
                for (&id, &at) in &activity_updates {
                    let _ = self.memory.update_session_activity(id, at);
                }
                for (id, nickname) in &nickname_updates {
                    let _ = self.memory.update_session_nickname(*id, nickname.clone());
                }
                for id in &deletions {
                    let _ = self.memory.delete_session(*id);
                }
                for (message, _) in &messages_by_request {
                    self.memory.apply_buffered_message(message.clone());
                }

                for (session, tx) in sessions_by_request {
                    let _ = tx.send(Ok(session));
                }
                for (message, tx) in messages_by_request {
                    let _ = tx.send(Ok(message));
                }
            }
            Err(e) => {
                error!(error = %e, "write buffer: flush failed, retrying last-writer-wins state next tick");

                // session-create and message-insert awaiters are not retried
                // automatically; they receive the error and must resubmit.
                for (_, tx) in sessions_by_request {
                    let _ = tx.send(Err(StoreError::Conflict(e.to_string())));
                }
                for (_, tx) in messages_by_request {
                    let _ = tx.send(Err(StoreError::Conflict(e.to_string())));
                }

                // activity, nickname, and deletion state is idempotent to
                // reapply, so it's merged back into the live queues.
                let mut live_activity = self.queues.activity_updates.lock().await;
                for (id, at) in activity_updates {
                    live_activity.entry(id).or_insert(at);
                }
                drop(live_activity);

                let mut live_nickname = self.queues.nickname_updates.lock().await;
                for (id, nickname) in nickname_updates {
                    live_nickname.entry(id).or_insert(nickname);
                }
                drop(live_nickname);

                let mut live_deletions = self.queues.deletions.lock().await;
                live_deletions.extend(deletions);
            }
        }
    }
}
