//! In-memory storage engine for a threaded-chat server, snapshotted to a
//! SQLite durable store.
//!
//! See [`Engine`] for the composed facade; the individual components
//! ([`memory`], [`durable`], [`writebuffer`], [`id`]) are public for
//! callers that need finer-grained control than the facade exposes.

pub mod config;
pub mod durable;
pub mod engine;
pub mod error;
pub mod id;
pub mod logging;
pub mod memory;
pub mod model;
mod util;
pub mod writebuffer;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EntityKind, Result, StoreError};
pub use model::{
    Channel, ChannelType, ConnectionType, CreateSessionRequest, Message, MessageVersion,
    PostMessageRequest, Session, User, VersionType,
};
