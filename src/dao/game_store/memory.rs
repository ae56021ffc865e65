use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    game_store::GameStore,
    models::{GameChanges, GameEntity},
    storage::StorageResult,
};

/// In-memory [`GameStore`] holding every record in a process-local map.
///
/// The map lock is held only for synchronous bookkeeping, so the version
/// check and the change-set application are atomic with respect to each
/// other. Used by the test suite and by `STORE_BACKEND=memory` runs.
#[derive(Clone, Default)]
pub struct MemoryGameStore {
    games: Arc<Mutex<HashMap<Uuid, GameEntity>>>,
}

impl MemoryGameStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_sync(&self, game: GameEntity) {
        let mut games = self.games.lock().unwrap_or_else(PoisonError::into_inner);
        games.insert(game.id, game);
    }

    fn find_sync(&self, id: Uuid) -> Option<GameEntity> {
        let games = self.games.lock().unwrap_or_else(PoisonError::into_inner);
        games.get(&id).cloned()
    }

    fn update_sync(&self, id: Uuid, expected_version: i64, changes: &GameChanges) -> bool {
        let mut games = self.games.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(game) = games.get_mut(&id) else {
            return false;
        };
        if game.version != expected_version {
            return false;
        }
        changes.apply_to(game);
        game.version = expected_version + 1;
        true
    }
}

impl GameStore for MemoryGameStore {
    fn insert_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.insert_sync(game);
            Ok(())
        })
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.find_sync(id)) })
    }

    fn update_game(
        &self,
        id: Uuid,
        expected_version: i64,
        changes: GameChanges,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.update_sync(id, expected_version, &changes)) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::dao::models::{GameMethod, GameResult};

    fn sample_game(id: Uuid) -> GameEntity {
        GameEntity {
            id,
            white_id: "alice".into(),
            black_id: "bob".into(),
            base_time_ms: 60_000,
            increment_ms: 0,
            white_time_ms: 60_000,
            black_time_ms: 60_000,
            turn_started_at_ms: 0,
            moves: Vec::new(),
            history: String::new(),
            result: None,
            method: None,
            white_draw_offered: false,
            black_draw_offered: false,
            version: 1,
            created_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn insert_then_find_round_trips() {
        let store = MemoryGameStore::new();
        let id = Uuid::new_v4();
        store.insert_game(sample_game(id)).await.unwrap();

        let found = store.find_game(id).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.version, 1);

        assert!(store.find_game(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_applies_changes_and_bumps_version() {
        let store = MemoryGameStore::new();
        let id = Uuid::new_v4();
        store.insert_game(sample_game(id)).await.unwrap();

        let changes = GameChanges {
            white_time_ms: Some(55_000),
            moves: Some(vec!["e2e4".into()]),
            ..GameChanges::default()
        };
        assert!(store.update_game(id, 1, changes).await.unwrap());

        let game = store.find_game(id).await.unwrap().unwrap();
        assert_eq!(game.version, 2);
        assert_eq!(game.white_time_ms, 55_000);
        assert_eq!(game.moves, vec!["e2e4".to_string()]);
    }

    #[tokio::test]
    async fn exactly_one_of_two_same_version_updates_wins() {
        let store = MemoryGameStore::new();
        let id = Uuid::new_v4();
        store.insert_game(sample_game(id)).await.unwrap();

        let first = GameChanges {
            result: Some(GameResult::BlackWon),
            method: Some(GameMethod::Timeout),
            white_time_ms: Some(0),
            ..GameChanges::default()
        };
        let second = GameChanges {
            moves: Some(vec!["e2e4".into()]),
            ..GameChanges::default()
        };

        let (a, b) = futures::join!(
            store.update_game(id, 1, first),
            store.update_game(id, 1, second)
        );
        assert!(a.unwrap() ^ b.unwrap());

        let game = store.find_game(id).await.unwrap().unwrap();
        assert_eq!(game.version, 2);
    }

    #[tokio::test]
    async fn update_of_unknown_game_reports_no_match() {
        let store = MemoryGameStore::new();
        let updated = store
            .update_game(Uuid::new_v4(), 1, GameChanges::default())
            .await
            .unwrap();
        assert!(!updated);
    }
}
