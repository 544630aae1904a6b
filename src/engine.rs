//! The engine facade: `open()`/`close()` lifecycle composing the Durable
//! Store, Memory Store, Write Buffer, and Identifier Generator.
//!
//! Mirrors `main.rs`'s startup sequencing (config → migrate → recover →
//! spawn background loops), restructured as a library constructor instead
//! of a `#[tokio::main]` binary entrypoint.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::config::EngineConfig;
use crate::durable::DurableStore;
use crate::error::Result;
use crate::id::IdGenerator;
use crate::memory::{snapshot, MemoryStore};
use crate::model::{Channel, CreateSessionRequest, Message, PostMessageRequest, Session};
use crate::writebuffer::WriteBuffer;

pub struct Engine {
    memory: Arc<MemoryStore>,
    durable: Arc<DurableStore>,
    write_buffer: Arc<WriteBuffer>,
    id_gen: Arc<IdGenerator>,
    shutdown_tx: watch::Sender<bool>,
    snapshot_task: tokio::task::JoinHandle<()>,
    flush_task: tokio::task::JoinHandle<()>,
}

impl Engine {
    /// Opens the durable store (applying migrations), runs the recovery
    /// scan, and spawns the snapshot and write-buffer flush loops.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let id_gen = Arc::new(IdGenerator::with_default_epoch(config.worker_id));
        let durable = Arc::new(DurableStore::open(&config.db_path, config.reader_pool_size)?);

        durable.ensure_default_channels(&id_gen)?;

        let channels: Vec<Channel> = durable.list_channels()?;
        let messages: Vec<Message> = durable.scan_live_messages()?;
        info!(
            channels = channels.len(),
            messages = messages.len(),
            "recovery scan complete"
        );

        let memory = Arc::new(MemoryStore::new(Arc::clone(&id_gen)));
        memory.load_from_recovery(channels, messages);

        let write_buffer = Arc::new(WriteBuffer::new(
            Arc::clone(&memory),
            Arc::clone(&durable),
            Arc::clone(&id_gen),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let snapshot_task = tokio::spawn(snapshot::run(
            Arc::clone(&memory),
            Arc::clone(&durable),
            config.snapshot_interval,
            config.hard_delete_after_days,
            shutdown_rx.clone(),
        ));

        let flush_buffer = Arc::clone(&write_buffer);
        let flush_interval = config.flush_interval;
        let flush_task = tokio::spawn(async move {
            flush_buffer.run(flush_interval, shutdown_rx).await;
        });

        info!("engine open");

        Ok(Self {
            memory,
            durable,
            write_buffer,
            id_gen,
            shutdown_tx,
            snapshot_task,
            flush_task,
        })
    }

    /// Signals the background loops to run one final pass and exit, then
    /// awaits them.
    pub async fn close(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.snapshot_task.await;
        let _ = self.flush_task.await;
        info!("engine closed");
    }

    pub fn id_generator(&self) -> &IdGenerator {
        &self.id_gen
    }

    // ---- sessions: direct, low-latency path ------------------------

    pub fn create_session(&self, req: CreateSessionRequest) -> Session {
        self.memory.create_session(req)
    }

    pub fn get_session(&self, id: i64) -> Result<Session> {
        self.memory.get_session(id)
    }

    pub fn get_active_sessions(&self, window_seconds: i64) -> Vec<Session> {
        self.memory.get_active_sessions(window_seconds)
    }

    // ---- sessions: buffered path -------------------------------------

    pub async fn create_session_buffered(&self, req: CreateSessionRequest) -> Result<Session> {
        self.write_buffer.create_session(req).await
    }

    pub async fn update_session_activity(&self, id: i64, at: i64) {
        self.write_buffer.update_session_activity(id, at).await
    }

    pub async fn update_session_nickname(&self, id: i64, nickname: String) {
        self.write_buffer.update_session_nickname(id, nickname).await
    }

    pub async fn delete_session_buffered(&self, id: i64) {
        self.write_buffer.delete_session(id).await
    }

    // ---- channels -----------------------------------------------------

    pub fn list_channels(&self) -> Vec<Channel> {
        self.memory.list_channels()
    }

    pub fn get_channel(&self, id: i64) -> Result<Channel> {
        self.memory.get_channel(id)
    }

    pub fn get_channel_by_name(&self, name: &str) -> Option<Channel> {
        self.memory.get_channel_by_name(name)
    }

    // ---- messages: direct path -----------------------------------

    pub fn post_message(&self, req: PostMessageRequest) -> Result<Message> {
        self.memory.post_message(req)
    }

    pub async fn post_message_buffered(&self, req: PostMessageRequest) -> Result<Message> {
        self.write_buffer.post_message(req).await
    }

    pub fn get_message(&self, id: i64) -> Result<Message> {
        self.memory.get_message(id)
    }

    pub fn get_root_messages(
        &self,
        channel_id: i64,
        from_id: i64,
        subchannel_id: Option<i64>,
        limit: usize,
    ) -> Vec<Message> {
        self.memory.get_root_messages(channel_id, from_id, subchannel_id, limit)
    }

    pub fn get_replies(&self, parent_id: i64) -> Result<Vec<Message>> {
        self.memory.get_replies(parent_id)
    }

    pub fn get_thread_messages(&self, thread_root_id: i64) -> Vec<Message> {
        self.memory.get_thread_messages(thread_root_id)
    }

    pub fn count_replies(&self, message_id: i64) -> Result<u32> {
        self.memory.count_replies(message_id)
    }

    pub fn soft_delete_message(&self, message_id: i64, nickname: &str) -> Result<()> {
        self.memory.soft_delete_message(message_id, nickname)
    }

    pub fn update_message(
        &self,
        message_id: i64,
        caller_user_id: Option<i64>,
        new_content: String,
    ) -> Result<Message> {
        self.memory.update_message(message_id, caller_user_id, new_content)
    }

    // ---- admin ---------------------------------------------------------

    pub fn durable(&self) -> &DurableStore {
        &self.durable
    }
}
