//! Session coordinator: every mutation of a persisted game funnels through
//! here.
//!
//! Each operation follows the same shape: read a snapshot, derive an explicit
//! change set, submit it through the store's version-checked update, then
//! reconcile the game's timer. No lock is held between the read and the
//! write; the version check is the sole serialization point, so two
//! concurrent attempts on the same game always resolve to one winner and one
//! stale rejection.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::models::{GameChanges, GameEntity, GameMethod, GameResult, Side},
    error::ServiceError,
    rules::Outcome,
    services::timer::TimerExpiry,
    state::SharedState,
};

/// Result of a successful mutation, carrying everything the transport layer
/// needs to broadcast the change to the game's participants.
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    /// Game the update belongs to.
    pub game_id: Uuid,
    /// Identity of the white player, for broadcast routing.
    pub white_id: String,
    /// Identity of the black player, for broadcast routing.
    pub black_id: String,
    /// Version the game reached with this update.
    pub version: i64,
    /// The accepted change set.
    pub changes: GameChanges,
}

impl SessionUpdate {
    fn applied(game: &GameEntity, changes: GameChanges) -> Self {
        Self {
            game_id: game.id,
            white_id: game.white_id.clone(),
            black_id: game.black_id.clone(),
            version: game.version + 1,
            changes,
        }
    }
}

/// Current wall-clock time as unix milliseconds.
pub(crate) fn unix_millis_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn not_found(game_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("game `{game_id}` not found"))
}

fn ensure_ongoing(game: &GameEntity) -> Result<(), ServiceError> {
    if game.result.is_some() {
        return Err(ServiceError::InvalidState(format!(
            "game `{}` has already concluded",
            game.id
        )));
    }
    Ok(())
}

/// Validate and persist one move for `player_id`.
///
/// The mover's clock is charged with the wall-clock time since the turn
/// started and credited the increment. A move arriving after the clock ran
/// out is still submitted: it races the armed timer, and whichever write
/// reaches the store first at the expected version wins.
pub async fn apply_move(
    state: &SharedState,
    game_id: Uuid,
    player_id: &str,
    notation: &str,
) -> Result<SessionUpdate, ServiceError> {
    let store = state.require_game_store().await?;
    let game = store
        .find_game(game_id)
        .await?
        .ok_or_else(|| not_found(game_id))?;
    ensure_ongoing(&game)?;

    let mut position = state.rules().replay(&game.moves)?;
    let mover = position.side_to_move();
    if game.identity_of(mover) != player_id {
        return Err(ServiceError::InvalidPlayer(format!(
            "player `{player_id}` is not on the move in game `{game_id}`"
        )));
    }
    position.apply(notation)?;

    let now = unix_millis_now();
    let elapsed = now - game.turn_started_at_ms;
    let remaining = game.time_remaining_ms(mover) - elapsed + game.increment_ms;

    // Any accepted move extinguishes standing draw offers before
    // eligibility is re-derived from the new position.
    let mut changes = GameChanges {
        white_draw_offered: Some(false),
        black_draw_offered: Some(false),
        ..GameChanges::default()
    };

    match position.outcome() {
        Some(Outcome::Decisive { winner, method }) => {
            changes.result = Some(GameResult::win_for(winner));
            changes.method = Some(method);
        }
        Some(Outcome::Drawn { method }) => {
            changes.result = Some(GameResult::Draw);
            changes.method = Some(method);
        }
        None => {
            if position.draw_claimable() {
                changes.white_draw_offered = Some(true);
                changes.black_draw_offered = Some(true);
            }
        }
    }

    match mover {
        Side::White => changes.white_time_ms = Some(remaining),
        Side::Black => changes.black_time_ms = Some(remaining),
    }
    changes.turn_started_at_ms = Some(now);

    let mut moves = game.moves.clone();
    moves.push(notation.to_owned());
    changes.history = Some(position.transcript());
    changes.moves = Some(moves);

    if !store
        .update_game(game_id, game.version, changes.clone())
        .await?
    {
        return Err(ServiceError::StaleUpdate);
    }

    let update = SessionUpdate::applied(&game, changes);
    if update.changes.concludes_game() {
        state.timers().cancel(game_id);
    } else {
        let next = mover.opponent();
        state.timers().schedule(
            game_id,
            Duration::from_millis(game.time_remaining_ms(next).max(0) as u64),
            TimerExpiry {
                game_id,
                expected_version: update.version,
                side: next,
            },
        );
    }

    Ok(update)
}

/// Record a draw offer from `player_id`. Clocks and the turn timestamp are
/// untouched.
pub async fn offer_draw(
    state: &SharedState,
    game_id: Uuid,
    player_id: &str,
) -> Result<SessionUpdate, ServiceError> {
    let store = state.require_game_store().await?;
    let game = store
        .find_game(game_id)
        .await?
        .ok_or_else(|| not_found(game_id))?;
    ensure_ongoing(&game)?;

    let side = game.side_of(player_id).ok_or_else(|| {
        ServiceError::InvalidPlayer(format!(
            "player `{player_id}` does not participate in game `{game_id}`"
        ))
    })?;

    let mut changes = GameChanges::default();
    match side {
        Side::White => changes.white_draw_offered = Some(true),
        Side::Black => changes.black_draw_offered = Some(true),
    }

    if !store
        .update_game(game_id, game.version, changes.clone())
        .await?
    {
        return Err(ServiceError::StaleUpdate);
    }

    Ok(SessionUpdate::applied(&game, changes))
}

/// Answer a standing draw offer.
///
/// Accepting concludes the game by agreement only when the opponent's offer
/// flag is set; declining clears both flags.
pub async fn respond_draw(
    state: &SharedState,
    game_id: Uuid,
    player_id: &str,
    accept: bool,
) -> Result<SessionUpdate, ServiceError> {
    let store = state.require_game_store().await?;
    let game = store
        .find_game(game_id)
        .await?
        .ok_or_else(|| not_found(game_id))?;
    ensure_ongoing(&game)?;

    let side = game.side_of(player_id).ok_or_else(|| {
        ServiceError::InvalidPlayer(format!(
            "player `{player_id}` does not participate in game `{game_id}`"
        ))
    })?;

    let mut changes = GameChanges {
        white_draw_offered: Some(false),
        black_draw_offered: Some(false),
        ..GameChanges::default()
    };

    if accept {
        if !game.draw_offered_by(side.opponent()) {
            return Err(ServiceError::InvalidState(format!(
                "no standing draw offer in game `{game_id}`"
            )));
        }
        changes.result = Some(GameResult::Draw);
        changes.method = Some(GameMethod::Agreement);
    }

    if !store
        .update_game(game_id, game.version, changes.clone())
        .await?
    {
        return Err(ServiceError::StaleUpdate);
    }

    let update = SessionUpdate::applied(&game, changes);
    if update.changes.concludes_game() {
        state.timers().cancel(game_id);
    }
    Ok(update)
}

/// Concede the game, awarding the win to the opponent.
pub async fn resign(
    state: &SharedState,
    game_id: Uuid,
    player_id: &str,
) -> Result<SessionUpdate, ServiceError> {
    let store = state.require_game_store().await?;
    let game = store
        .find_game(game_id)
        .await?
        .ok_or_else(|| not_found(game_id))?;
    ensure_ongoing(&game)?;

    let side = game.side_of(player_id).ok_or_else(|| {
        ServiceError::InvalidPlayer(format!(
            "player `{player_id}` does not participate in game `{game_id}`"
        ))
    })?;

    let changes = GameChanges {
        white_draw_offered: Some(false),
        black_draw_offered: Some(false),
        result: Some(GameResult::win_for(side.opponent())),
        method: Some(GameMethod::Resignation),
        ..GameChanges::default()
    };

    if !store
        .update_game(game_id, game.version, changes.clone())
        .await?
    {
        return Err(ServiceError::StaleUpdate);
    }

    state.timers().cancel(game_id);
    Ok(SessionUpdate::applied(&game, changes))
}

/// Resolve a fired clock deadline. Only the expiry loop calls this.
///
/// Returns `Ok(None)` when the expiry no longer applies: the game moved past
/// the expected version, already concluded, or disappeared. Such expiries
/// are dropped without retry; a store failure propagates so the caller can
/// report it, but it is never surfaced to clients.
pub async fn resolve_timeout(
    state: &SharedState,
    expiry: TimerExpiry,
) -> Result<Option<SessionUpdate>, ServiceError> {
    let store = state.require_game_store().await?;
    let Some(game) = store.find_game(expiry.game_id).await? else {
        return Ok(None);
    };
    if game.result.is_some() || game.version != expiry.expected_version {
        return Ok(None);
    }

    let mut changes = GameChanges {
        white_draw_offered: Some(false),
        black_draw_offered: Some(false),
        result: Some(GameResult::win_for(expiry.side.opponent())),
        method: Some(GameMethod::Timeout),
        ..GameChanges::default()
    };
    match expiry.side {
        Side::White => changes.white_time_ms = Some(0),
        Side::Black => changes.black_time_ms = Some(0),
    }

    if !store
        .update_game(expiry.game_id, expiry.expected_version, changes.clone())
        .await?
    {
        debug!(id = %expiry.game_id, "timer expiry lost the race against a newer update");
        return Ok(None);
    }

    state.timers().cancel(expiry.game_id);
    Ok(Some(SessionUpdate::applied(&game, changes)))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    };
    use std::time::SystemTime;

    use futures::future::BoxFuture;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        dao::{
            game_store::{GameStore, memory::MemoryGameStore},
            storage::StorageResult,
        },
        services::timer::TimerManager,
        state::AppState,
    };

    fn sample_game(id: Uuid) -> GameEntity {
        GameEntity {
            id,
            white_id: "alice".into(),
            black_id: "bob".into(),
            base_time_ms: 300_000,
            increment_ms: 2_000,
            white_time_ms: 300_000,
            black_time_ms: 300_000,
            turn_started_at_ms: unix_millis_now(),
            moves: Vec::new(),
            history: String::new(),
            result: None,
            method: None,
            white_draw_offered: false,
            black_draw_offered: false,
            version: 1,
            created_at: SystemTime::now(),
        }
    }

    async fn seeded_state(
        game: GameEntity,
    ) -> (
        SharedState,
        mpsc::UnboundedReceiver<TimerExpiry>,
        MemoryGameStore,
    ) {
        let (timers, expiries) = TimerManager::new();
        let state = AppState::new(timers);
        let store = MemoryGameStore::new();
        store.insert_game(game).await.unwrap();
        state.set_game_store(Arc::new(store.clone())).await;
        (state, expiries, store)
    }

    #[tokio::test]
    async fn accepted_move_advances_version_clock_and_timer() {
        let id = Uuid::new_v4();
        let (state, _expiries, store) = seeded_state(sample_game(id)).await;

        let update = apply_move(&state, id, "alice", "e2e4").await.unwrap();
        assert_eq!(update.version, 2);
        assert_eq!(update.changes.white_draw_offered, Some(false));
        assert_eq!(update.changes.black_draw_offered, Some(false));

        let game = store.find_game(id).await.unwrap().unwrap();
        assert_eq!(game.version, 2);
        assert_eq!(game.moves, vec!["e2e4".to_string()]);
        assert_eq!(game.history, "1. e2e4");
        assert!(game.result.is_none());
        // Full clock minus a near-zero elapsed slice, plus the increment.
        assert!(game.white_time_ms <= 302_000 && game.white_time_ms > 300_000);
        assert_eq!(game.black_time_ms, 300_000);

        // Black is now on the move and on the clock.
        assert!(state.timers().scheduled(id));
    }

    #[tokio::test]
    async fn replaying_stored_moves_reproduces_the_stored_history() {
        let id = Uuid::new_v4();
        let (state, _expiries, store) = seeded_state(sample_game(id)).await;

        apply_move(&state, id, "alice", "e2e4").await.unwrap();
        apply_move(&state, id, "bob", "e7e5").await.unwrap();
        apply_move(&state, id, "alice", "g1f3").await.unwrap();

        let game = store.find_game(id).await.unwrap().unwrap();
        let position = state.rules().replay(&game.moves).unwrap();
        assert_eq!(position.transcript(), game.history);
        assert_eq!(game.history, "1. e2e4 e7e5 2. g1f3");
    }

    #[tokio::test]
    async fn wrong_identity_is_rejected_without_mutation() {
        let id = Uuid::new_v4();
        let (state, _expiries, store) = seeded_state(sample_game(id)).await;

        let err = apply_move(&state, id, "bob", "e2e4").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidPlayer(_)));

        let err = apply_move(&state, id, "stranger", "e2e4").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidPlayer(_)));

        let game = store.find_game(id).await.unwrap().unwrap();
        assert_eq!(game.version, 1);
        assert!(game.moves.is_empty());
        assert!(!state.timers().scheduled(id));
    }

    #[tokio::test]
    async fn illegal_move_is_rejected_without_mutation() {
        let id = Uuid::new_v4();
        let (state, _expiries, store) = seeded_state(sample_game(id)).await;

        let err = apply_move(&state, id, "alice", "e2e5").await.unwrap_err();
        assert!(matches!(err, ServiceError::IllegalMove(_)));

        let game = store.find_game(id).await.unwrap().unwrap();
        assert_eq!(game.version, 1);
    }

    #[tokio::test]
    async fn corrupt_stored_history_is_an_integrity_error() {
        let id = Uuid::new_v4();
        let mut game = sample_game(id);
        game.moves = vec!["zzzz".into()];
        let (state, _expiries, _store) = seeded_state(game).await;

        let err = apply_move(&state, id, "alice", "e2e4").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidHistory(_)));
    }

    #[tokio::test]
    async fn unknown_game_is_not_found() {
        let (state, _expiries, _store) = seeded_state(sample_game(Uuid::new_v4())).await;
        let err = apply_move(&state, Uuid::new_v4(), "alice", "e2e4")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn move_resets_standing_draw_offers() {
        let id = Uuid::new_v4();
        let mut game = sample_game(id);
        game.white_draw_offered = true;
        game.black_draw_offered = true;
        let (state, _expiries, store) = seeded_state(game).await;

        apply_move(&state, id, "alice", "e2e4").await.unwrap();

        let game = store.find_game(id).await.unwrap().unwrap();
        assert!(!game.white_draw_offered);
        assert!(!game.black_draw_offered);
    }

    #[tokio::test]
    async fn checkmate_concludes_the_game_and_disarms_the_timer() {
        let id = Uuid::new_v4();
        let mut game = sample_game(id);
        game.moves = vec!["f2f3".into(), "e7e5".into(), "g2g4".into()];
        game.version = 4;
        let (state, _expiries, store) = seeded_state(game).await;

        let update = apply_move(&state, id, "bob", "d8h4").await.unwrap();
        assert_eq!(update.changes.result, Some(GameResult::BlackWon));
        assert_eq!(update.changes.method, Some(GameMethod::Checkmate));

        let game = store.find_game(id).await.unwrap().unwrap();
        assert_eq!(game.result, Some(GameResult::BlackWon));
        assert_eq!(game.version, 5);
        assert!(!state.timers().scheduled(id));
    }

    #[tokio::test]
    async fn draw_offer_then_acceptance_concludes_by_agreement() {
        let id = Uuid::new_v4();
        let (state, _expiries, store) = seeded_state(sample_game(id)).await;

        let update = offer_draw(&state, id, "alice").await.unwrap();
        assert_eq!(update.changes.white_draw_offered, Some(true));
        assert_eq!(update.changes.black_draw_offered, None);

        let update = respond_draw(&state, id, "bob", true).await.unwrap();
        assert_eq!(update.changes.result, Some(GameResult::Draw));
        assert_eq!(update.changes.method, Some(GameMethod::Agreement));

        let game = store.find_game(id).await.unwrap().unwrap();
        assert_eq!(game.result, Some(GameResult::Draw));
        assert_eq!(game.version, 3);
        assert!(!game.white_draw_offered);
        assert!(!game.black_draw_offered);
    }

    #[tokio::test]
    async fn draw_acceptance_without_an_offer_is_refused() {
        let id = Uuid::new_v4();
        let (state, _expiries, store) = seeded_state(sample_game(id)).await;

        let err = respond_draw(&state, id, "bob", true).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        let game = store.find_game(id).await.unwrap().unwrap();
        assert_eq!(game.version, 1);
        assert!(game.result.is_none());
    }

    #[tokio::test]
    async fn declining_clears_both_offer_flags() {
        let id = Uuid::new_v4();
        let mut game = sample_game(id);
        game.white_draw_offered = true;
        let (state, _expiries, store) = seeded_state(game).await;

        let update = respond_draw(&state, id, "bob", false).await.unwrap();
        assert!(update.changes.result.is_none());

        let game = store.find_game(id).await.unwrap().unwrap();
        assert!(!game.white_draw_offered);
        assert!(!game.black_draw_offered);
        assert!(game.result.is_none());
    }

    #[tokio::test]
    async fn resignation_awards_the_opponent() {
        let id = Uuid::new_v4();
        let (state, _expiries, store) = seeded_state(sample_game(id)).await;

        let update = resign(&state, id, "bob").await.unwrap();
        assert_eq!(update.changes.result, Some(GameResult::WhiteWon));
        assert_eq!(update.changes.method, Some(GameMethod::Resignation));

        let game = store.find_game(id).await.unwrap().unwrap();
        assert_eq!(game.result, Some(GameResult::WhiteWon));
    }

    #[tokio::test]
    async fn concluded_games_refuse_every_mutation() {
        let id = Uuid::new_v4();
        let mut game = sample_game(id);
        game.result = Some(GameResult::WhiteWon);
        game.method = Some(GameMethod::Resignation);
        game.version = 7;
        let (state, _expiries, store) = seeded_state(game).await;

        assert!(matches!(
            apply_move(&state, id, "alice", "e2e4").await,
            Err(ServiceError::InvalidState(_))
        ));
        assert!(matches!(
            offer_draw(&state, id, "alice").await,
            Err(ServiceError::InvalidState(_))
        ));
        assert!(matches!(
            respond_draw(&state, id, "bob", true).await,
            Err(ServiceError::InvalidState(_))
        ));
        assert!(matches!(
            resign(&state, id, "bob").await,
            Err(ServiceError::InvalidState(_))
        ));

        let resolved = resolve_timeout(
            &state,
            TimerExpiry {
                game_id: id,
                expected_version: 7,
                side: Side::White,
            },
        )
        .await
        .unwrap();
        assert!(resolved.is_none());

        let game = store.find_game(id).await.unwrap().unwrap();
        assert_eq!(game.version, 7);
    }

    #[tokio::test]
    async fn timeout_resolution_zeroes_the_clock_and_awards_the_opponent() {
        let id = Uuid::new_v4();
        let (state, _expiries, store) = seeded_state(sample_game(id)).await;

        let update = resolve_timeout(
            &state,
            TimerExpiry {
                game_id: id,
                expected_version: 1,
                side: Side::White,
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(update.changes.result, Some(GameResult::BlackWon));
        assert_eq!(update.changes.method, Some(GameMethod::Timeout));

        let game = store.find_game(id).await.unwrap().unwrap();
        assert_eq!(game.result, Some(GameResult::BlackWon));
        assert_eq!(game.method, Some(GameMethod::Timeout));
        assert_eq!(game.white_time_ms, 0);
        assert_eq!(game.version, 2);
    }

    #[tokio::test]
    async fn stale_timeout_is_dropped_silently() {
        let id = Uuid::new_v4();
        let (state, _expiries, store) = seeded_state(sample_game(id)).await;

        apply_move(&state, id, "alice", "e2e4").await.unwrap();

        // The expiry was armed at version 1; the move advanced to 2.
        let resolved = resolve_timeout(
            &state,
            TimerExpiry {
                game_id: id,
                expected_version: 1,
                side: Side::White,
            },
        )
        .await
        .unwrap();
        assert!(resolved.is_none());

        let game = store.find_game(id).await.unwrap().unwrap();
        assert!(game.result.is_none());
        assert_eq!(game.version, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn armed_timer_fires_and_concludes_on_time() {
        let id = Uuid::new_v4();
        let mut game = sample_game(id);
        game.white_time_ms = 5_000;
        game.increment_ms = 0;
        let (state, mut expiries, store) = seeded_state(game).await;

        state.timers().schedule(
            id,
            Duration::from_millis(5_000),
            TimerExpiry {
                game_id: id,
                expected_version: 1,
                side: Side::White,
            },
        );

        // No move arrives; the deadline passes and the expiry is delivered.
        let expiry = expiries.recv().await.unwrap();
        let update = resolve_timeout(&state, expiry).await.unwrap().unwrap();
        assert_eq!(update.changes.result, Some(GameResult::BlackWon));

        let game = store.find_game(id).await.unwrap().unwrap();
        assert_eq!(game.result, Some(GameResult::BlackWon));
        assert_eq!(game.method, Some(GameMethod::Timeout));
        assert_eq!(game.white_time_ms, 0);
    }

    /// Store wrapper that sneaks a rival update in ahead of the first
    /// version-checked write, so the caller observes a genuine lost race.
    #[derive(Clone)]
    struct ContendedStore {
        inner: MemoryGameStore,
        rival_pending: Arc<AtomicBool>,
        rival_changes: Arc<Mutex<Option<GameChanges>>>,
    }

    impl ContendedStore {
        fn new(inner: MemoryGameStore, rival: GameChanges) -> Self {
            Self {
                inner,
                rival_pending: Arc::new(AtomicBool::new(true)),
                rival_changes: Arc::new(Mutex::new(Some(rival))),
            }
        }
    }

    impl GameStore for ContendedStore {
        fn insert_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.insert_game(game)
        }

        fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
            self.inner.find_game(id)
        }

        fn update_game(
            &self,
            id: Uuid,
            expected_version: i64,
            changes: GameChanges,
        ) -> BoxFuture<'static, StorageResult<bool>> {
            let store = self.clone();
            Box::pin(async move {
                if store.rival_pending.swap(false, Ordering::SeqCst) {
                    let rival = store.rival_changes.lock().unwrap().take();
                    if let Some(rival) = rival {
                        store.inner.update_game(id, expected_version, rival).await?;
                    }
                }
                store.inner.update_game(id, expected_version, changes).await
            })
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    #[tokio::test]
    async fn losing_the_version_race_yields_a_stale_update() {
        let id = Uuid::new_v4();
        let inner = MemoryGameStore::new();
        inner.insert_game(sample_game(id)).await.unwrap();

        let rival = GameChanges {
            moves: Some(vec!["d2d4".into()]),
            history: Some("1. d2d4".into()),
            turn_started_at_ms: Some(unix_millis_now()),
            white_draw_offered: Some(false),
            black_draw_offered: Some(false),
            ..GameChanges::default()
        };
        let (timers, _expiries) = TimerManager::new();
        let state = AppState::new(timers);
        state
            .set_game_store(Arc::new(ContendedStore::new(inner.clone(), rival)))
            .await;

        let err = apply_move(&state, id, "alice", "e2e4").await.unwrap_err();
        assert!(matches!(err, ServiceError::StaleUpdate));

        // The rival's move is what stuck.
        let game = inner.find_game(id).await.unwrap().unwrap();
        assert_eq!(game.version, 2);
        assert_eq!(game.moves, vec!["d2d4".to_string()]);
        // The loser armed no timer.
        assert!(!state.timers().scheduled(id));
    }
}
