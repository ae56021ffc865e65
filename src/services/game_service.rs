//! Game bootstrap and snapshot reads.

use std::time::{Duration, SystemTime};

use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{GameEntity, Side},
    dto::game::{CreateGameRequest, GameSnapshot},
    error::ServiceError,
    services::{session::unix_millis_now, timer::TimerExpiry},
    state::SharedState,
};

/// Start a match between two players and persist its initial record.
///
/// The record starts at version 1 with both clocks at the base budget, and
/// white's deadline is armed immediately: the first move races the clock the
/// same way every later move does.
pub async fn create_game(
    state: &SharedState,
    request: CreateGameRequest,
) -> Result<GameSnapshot, ServiceError> {
    request.validate()?;
    if request.white_id == request.black_id {
        return Err(ServiceError::InvalidInput(
            "a game requires two distinct players".into(),
        ));
    }

    let store = state.require_game_store().await?;

    let game = GameEntity {
        id: Uuid::new_v4(),
        white_id: request.white_id,
        black_id: request.black_id,
        base_time_ms: request.base_time_ms,
        increment_ms: request.increment_ms,
        white_time_ms: request.base_time_ms,
        black_time_ms: request.base_time_ms,
        turn_started_at_ms: unix_millis_now(),
        moves: Vec::new(),
        history: String::new(),
        result: None,
        method: None,
        white_draw_offered: false,
        black_draw_offered: false,
        version: 1,
        created_at: SystemTime::now(),
    };

    store.insert_game(game.clone()).await?;

    state.timers().schedule(
        game.id,
        Duration::from_millis(game.base_time_ms.max(0) as u64),
        TimerExpiry {
            game_id: game.id,
            expected_version: game.version,
            side: Side::White,
        },
    );

    info!(id = %game.id, white = %game.white_id, black = %game.black_id, "game created");
    Ok(game.into())
}

/// Fetch a full game snapshot, the resynchronization point for clients that
/// received a stale-update rejection.
pub async fn get_game(state: &SharedState, id: Uuid) -> Result<GameSnapshot, ServiceError> {
    let store = state.require_game_store().await?;
    let game = store
        .find_game(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("game `{id}` not found")))?;
    Ok(game.into())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        dao::game_store::memory::MemoryGameStore,
        services::timer::TimerManager,
        state::AppState,
    };

    fn request() -> CreateGameRequest {
        CreateGameRequest {
            white_id: "alice".into(),
            black_id: "bob".into(),
            base_time_ms: 180_000,
            increment_ms: 2_000,
        }
    }

    async fn test_state() -> SharedState {
        let (timers, _expiries) = TimerManager::new();
        let state = AppState::new(timers);
        state
            .set_game_store(Arc::new(MemoryGameStore::new()))
            .await;
        state
    }

    #[tokio::test]
    async fn created_game_starts_at_version_one_with_full_clocks() {
        let state = test_state().await;
        let snapshot = create_game(&state, request()).await.unwrap();

        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.white_time_ms, 180_000);
        assert_eq!(snapshot.black_time_ms, 180_000);
        assert!(snapshot.moves.is_empty());
        assert!(snapshot.result.is_none());

        // White is on the clock from the start.
        assert!(state.timers().scheduled(snapshot.id));

        let fetched = get_game(&state, snapshot.id).await.unwrap();
        assert_eq!(fetched.version, 1);
        assert_eq!(fetched.white_id, "alice");
    }

    #[tokio::test]
    async fn identical_players_are_rejected() {
        let state = test_state().await;
        let mut req = request();
        req.black_id = "alice".into();
        let err = create_game(&state, req).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unknown_game_snapshot_is_not_found() {
        let state = test_state().await;
        let err = get_game(&state, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn creation_is_refused_in_degraded_mode() {
        let (timers, _expiries) = TimerManager::new();
        let state = AppState::new(timers);
        let err = create_game(&state, request()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
    }
}
