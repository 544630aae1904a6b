//! The periodic snapshot loop: batches dirty messages from the Memory
//! Store to the Durable Store, then sweeps hard-delete-eligible messages.
//!
//! Grounded in `lifestats.rs`'s writer-thread loop (batch-on-interval) and
//! the corpus's `is_running: Arc<AtomicBool>` shutdown idiom
//! (`veza-chat-server/optimized_persistence.rs`), adapted to a
//! `tokio::sync::watch<bool>` signal since this engine is otherwise async.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::durable::DurableStore;
use crate::memory::MemoryStore;
use crate::util::now_ms;

/// Runs until `shutdown` reports `true`, then performs one final pass and
/// returns.
pub async fn run(
    memory: Arc<MemoryStore>,
    durable: Arc<DurableStore>,
    interval: Duration,
    hard_delete_after_days: i64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tick(&memory, &durable, hard_delete_after_days);
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("snapshot loop: running final pass before shutdown");
                    tick(&memory, &durable, hard_delete_after_days);
                    break;
                }
            }
        }
    }
}

/// Best-effort: on failure, logs and leaves the dirty set untouched so the
/// next tick retries the same rows.
fn tick(memory: &MemoryStore, durable: &DurableStore, hard_delete_after_days: i64) {
    let (dirty_messages, pending_versions) = memory.drain_dirty_for_snapshot();
    if dirty_messages.is_empty() && pending_versions.is_empty() {
        return;
    }

    let cutoff = now_ms() - hard_delete_after_days * 86_400_000;
    let (skipped, kept): (Vec<_>, Vec<_>) = dirty_messages
        .into_iter()
        .partition(|m| m.deleted_at.map(|d| d < cutoff).unwrap_or(false));

    if !skipped.is_empty() {
        debug!(count = skipped.len(), "snapshot: skipping rows past hard-delete cutoff");
    }

    if let Err(e) = durable.batch_upsert_messages(&kept) {
        error!(error = %e, "snapshot: batch upsert failed, dirty set retained for retry");
        return;
    }
    if let Err(e) = durable.insert_message_versions(&pending_versions) {
        error!(error = %e, "snapshot: message version insert failed, dirty set retained for retry");
        return;
    }

    let flushed_ids: Vec<i64> = kept.iter().map(|m| m.id).chain(skipped.iter().map(|m| m.id)).collect();
    memory.clear_dirty(&flushed_ids);
    info!(flushed = flushed_ids.len(), "snapshot: flush complete");

    let hard_delete_ids = memory.collect_hard_delete_candidates(cutoff);
    if hard_delete_ids.is_empty() {
        return;
    }
    if let Err(e) = durable.hard_delete_messages(&hard_delete_ids) {
        error!(error = %e, "snapshot: hard delete failed, will retry next tick");
        return;
    }
    memory.hard_delete(&hard_delete_ids);
    info!(count = hard_delete_ids.len(), "snapshot: hard-deleted expired messages");
}
