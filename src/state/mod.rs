//! Shared application state: the installed game store, the live connection
//! registry, the per-game timer table, and the degraded-mode flag.

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, watch};
use uuid::Uuid;

use crate::{
    dao::game_store::GameStore,
    error::ServiceError,
    rules::{RulesOracle, StandardRules},
    services::timer::TimerManager,
};

/// Cheaply cloneable handle to the process-wide state.
pub type SharedState = Arc<AppState>;

/// Handle used to push frames to one connected player socket.
///
/// `socket_id` identifies the physical connection so that a stale teardown
/// can never evict a newer socket registered under the same player.
#[derive(Clone)]
pub struct PlayerConnection {
    /// Participant identity the socket authenticated as.
    pub player_id: String,
    /// Instance identifier of this particular socket.
    pub socket_id: Uuid,
    /// Sender feeding the connection's outbound writer task.
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Central application state storing persistent connections and storage
/// handles.
pub struct AppState {
    game_store: RwLock<Option<Arc<dyn GameStore>>>,
    rules: Arc<dyn RulesOracle>,
    players: DashMap<String, PlayerConnection>,
    timers: TimerManager,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct the state wrapped in an [`Arc`].
    ///
    /// The application starts in degraded mode until a storage backend is
    /// installed.
    pub fn new(timers: TimerManager) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            game_store: RwLock::new(None),
            rules: Arc::new(StandardRules::new()),
            players: DashMap::new(),
            timers,
            degraded: degraded_tx,
        })
    }

    /// Obtain a handle to the current game store, if one is installed.
    pub async fn game_store(&self) -> Option<Arc<dyn GameStore>> {
        let guard = self.game_store.read().await;
        guard.as_ref().cloned()
    }

    /// Obtain the installed game store or refuse with a degraded-mode error.
    pub async fn require_game_store(&self) -> Result<Arc<dyn GameStore>, ServiceError> {
        self.game_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a storage backend and leave degraded mode.
    pub async fn set_game_store(&self, store: Arc<dyn GameStore>) {
        {
            let mut guard = self.game_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current storage backend and enter degraded mode.
    pub async fn clear_game_store(&self) {
        {
            let mut guard = self.game_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Flip and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current != value {
                *current = value;
                true
            } else {
                false
            }
        });
    }

    /// The rules oracle consulted by the session coordinator.
    pub fn rules(&self) -> &Arc<dyn RulesOracle> {
        &self.rules
    }

    /// The per-game timeout table.
    pub fn timers(&self) -> &TimerManager {
        &self.timers
    }

    /// Registry of connected player sockets keyed by participant identity.
    pub fn players(&self) -> &DashMap<String, PlayerConnection> {
        &self.players
    }

    /// Insert or overwrite the registry entry for the connection's identity.
    ///
    /// A reconnecting player replaces their stale socket; the replaced
    /// socket's eventual teardown is a no-op thanks to the socket id check
    /// in [`AppState::unregister_player`].
    pub fn register_player(&self, connection: PlayerConnection) {
        self.players
            .insert(connection.player_id.clone(), connection);
    }

    /// Remove the registry entry only if it still belongs to `socket_id`.
    ///
    /// Returns whether an entry was actually removed.
    pub fn unregister_player(&self, player_id: &str, socket_id: Uuid) -> bool {
        self.players
            .remove_if(player_id, |_, existing| existing.socket_id == socket_id)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::timer::TimerManager;

    fn connection(player_id: &str) -> PlayerConnection {
        let (tx, _rx) = mpsc::unbounded_channel();
        PlayerConnection {
            player_id: player_id.into(),
            socket_id: Uuid::new_v4(),
            tx,
        }
    }

    fn state() -> SharedState {
        let (timers, _expiries) = TimerManager::new();
        AppState::new(timers)
    }

    #[tokio::test]
    async fn register_overwrites_previous_socket() {
        let state = state();
        let first = connection("alice");
        let second = connection("alice");
        let second_socket = second.socket_id;

        state.register_player(first);
        state.register_player(second);

        assert_eq!(state.players().len(), 1);
        let stored = state.players().get("alice").unwrap();
        assert_eq!(stored.socket_id, second_socket);
    }

    #[tokio::test]
    async fn stale_unregister_does_not_evict_newer_connection() {
        let state = state();
        let stale = connection("alice");
        let stale_socket = stale.socket_id;
        let fresh = connection("alice");
        let fresh_socket = fresh.socket_id;

        state.register_player(stale);
        state.register_player(fresh);

        assert!(!state.unregister_player("alice", stale_socket));
        assert!(state.players().contains_key("alice"));

        assert!(state.unregister_player("alice", fresh_socket));
        assert!(!state.players().contains_key("alice"));
        assert!(!state.unregister_player("alice", fresh_socket));
    }

    #[tokio::test]
    async fn degraded_until_a_store_is_installed() {
        let state = state();
        assert!(state.is_degraded().await);
        assert!(matches!(
            state.require_game_store().await,
            Err(ServiceError::Degraded)
        ));

        let store = crate::dao::game_store::memory::MemoryGameStore::new();
        state.set_game_store(Arc::new(store)).await;
        assert!(!state.is_degraded().await);
        assert!(state.require_game_store().await.is_ok());

        state.clear_game_store().await;
        assert!(state.is_degraded().await);
    }
}
