//! Per-game timeout scheduling.
//!
//! Every active game owns at most one armed deadline. Expiries are plain
//! values delivered over a single channel into [`run_expiry_loop`], which
//! feeds the session coordinator's timeout path; nothing game-related is
//! captured inside the deadline tasks themselves.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::Side,
    services::{session, websocket_service},
    state::SharedState,
};

/// Value sent when a side's clock runs out.
///
/// The expected version pins the expiry to the game state it was armed
/// against: if any move landed in between, the versioned update rejects the
/// expiry and it dissolves without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerExpiry {
    /// Game whose clock expired.
    pub game_id: Uuid,
    /// Version the game had when the deadline was armed.
    pub expected_version: i64,
    /// Side whose clock ran out.
    pub side: Side,
}

struct TimerEntry {
    token: u64,
    handle: JoinHandle<()>,
}

struct TimerInner {
    entries: DashMap<Uuid, TimerEntry>,
    expiry_tx: mpsc::UnboundedSender<TimerExpiry>,
    token_seq: AtomicU64,
}

/// Deadline table guaranteeing at most one live timer per game id.
#[derive(Clone)]
pub struct TimerManager {
    inner: Arc<TimerInner>,
}

impl TimerManager {
    /// Create the manager plus the receiving end of the expiry channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerExpiry>) {
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        let manager = Self {
            inner: Arc::new(TimerInner {
                entries: DashMap::new(),
                expiry_tx,
                token_seq: AtomicU64::new(0),
            }),
        };
        (manager, expiry_rx)
    }

    /// Arm a deadline for `game_id`, replacing any timer already scheduled
    /// for it.
    ///
    /// The expiry fires exactly once after `duration`, unless the entry is
    /// canceled or replaced first. An expiry that was already past its sleep
    /// when it got replaced may still be delivered; the version carried in
    /// the expiry makes that delivery harmless.
    pub fn schedule(&self, game_id: Uuid, duration: Duration, expiry: TimerExpiry) {
        let token = self.inner.token_seq.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            // Retire our own entry before delivering, so a cancel arriving
            // after this point stays a no-op instead of aborting a sibling.
            inner
                .entries
                .remove_if(&game_id, |_, entry| entry.token == token);
            let _ = inner.expiry_tx.send(expiry);
        });

        if let Some(previous) = self.inner.entries.insert(game_id, TimerEntry { token, handle }) {
            previous.handle.abort();
        }
    }

    /// Drop the timer for `game_id` if one is armed. Idempotent.
    ///
    /// After this returns the armed expiry will not fire; a firing that
    /// already left the sleep may still be delivered and is resolved by the
    /// store's version check.
    pub fn cancel(&self, game_id: Uuid) {
        if let Some((_, entry)) = self.inner.entries.remove(&game_id) {
            entry.handle.abort();
        }
    }

    /// Whether a timer is currently armed for `game_id`.
    pub fn scheduled(&self, game_id: Uuid) -> bool {
        self.inner.entries.contains_key(&game_id)
    }
}

/// Drain the expiry channel, resolving each expiry through the session
/// coordinator and broadcasting the conclusions that stick.
///
/// A failed resolution is logged and dropped: the stored game stays
/// nominally ongoing and the next move attempt re-detects the overrun.
pub async fn run_expiry_loop(
    state: SharedState,
    mut expiries: mpsc::UnboundedReceiver<TimerExpiry>,
) {
    while let Some(expiry) = expiries.recv().await {
        match session::resolve_timeout(&state, expiry).await {
            Ok(Some(update)) => {
                info!(
                    id = %update.game_id,
                    side = ?expiry.side,
                    "game concluded on time"
                );
                websocket_service::broadcast_update(&state, &update);
            }
            Ok(None) => {
                debug!(id = %expiry.game_id, "timer expiry was superseded");
            }
            Err(err) => {
                warn!(id = %expiry.game_id, error = %err, "failed to resolve timer expiry");
            }
        }
    }
}
