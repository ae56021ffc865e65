use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{GameEntity, GameMethod, GameResult},
    dto::{format_system_time, validation::validate_player_id},
    services::session::SessionUpdate,
};

/// Payload used to start a match between two players.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateGameRequest {
    /// Identity of the player taking the white pieces.
    #[validate(custom(function = validate_player_id))]
    pub white_id: String,
    /// Identity of the player taking the black pieces.
    #[validate(custom(function = validate_player_id))]
    pub black_id: String,
    /// Clock budget per side in milliseconds (1 second up to 24 hours).
    #[validate(range(min = 1_000, max = 86_400_000))]
    pub base_time_ms: i64,
    /// Per-move time credit in milliseconds (up to 10 minutes).
    #[serde(default)]
    #[validate(range(min = 0, max = 600_000))]
    pub increment_ms: i64,
}

/// Full projection of a game, served over REST so clients can resynchronize
/// after a stale-update rejection.
#[derive(Debug, Serialize, ToSchema)]
pub struct GameSnapshot {
    /// Game identifier.
    pub id: Uuid,
    /// Identity of the white player.
    pub white_id: String,
    /// Identity of the black player.
    pub black_id: String,
    /// Clock budget per side in milliseconds.
    pub base_time_ms: i64,
    /// Per-move time credit in milliseconds.
    pub increment_ms: i64,
    /// White's remaining clock in milliseconds.
    pub white_time_ms: i64,
    /// Black's remaining clock in milliseconds.
    pub black_time_ms: i64,
    /// Unix milliseconds at which the current turn began.
    pub turn_started_at_ms: i64,
    /// Accepted moves in coordinate notation.
    pub moves: Vec<String>,
    /// Rendered transcript of the move list.
    pub history: String,
    /// Terminal result, absent while the game is ongoing.
    #[schema(value_type = Option<String>)]
    pub result: Option<GameResult>,
    /// Conclusion method, absent while the game is ongoing.
    #[schema(value_type = Option<String>)]
    pub method: Option<GameMethod>,
    /// Whether white has a standing draw offer.
    pub white_draw_offered: bool,
    /// Whether black has a standing draw offer.
    pub black_draw_offered: bool,
    /// Version of this snapshot; echoes into the next broadcast delta.
    pub version: i64,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

impl From<GameEntity> for GameSnapshot {
    fn from(game: GameEntity) -> Self {
        Self {
            id: game.id,
            white_id: game.white_id,
            black_id: game.black_id,
            base_time_ms: game.base_time_ms,
            increment_ms: game.increment_ms,
            white_time_ms: game.white_time_ms,
            black_time_ms: game.black_time_ms,
            turn_started_at_ms: game.turn_started_at_ms,
            moves: game.moves,
            history: game.history,
            result: game.result,
            method: game.method,
            white_draw_offered: game.white_draw_offered,
            black_draw_offered: game.black_draw_offered,
            version: game.version,
            created_at: format_system_time(game.created_at),
        }
    }
}

/// Incremental game update broadcast to both participants after a successful
/// mutation. Only the fields the mutation touched are present.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GameDelta {
    /// Game the delta belongs to.
    pub game_id: Uuid,
    /// Version the game reached with this delta.
    pub version: i64,
    /// New remaining clock for white, when changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub white_time_ms: Option<i64>,
    /// New remaining clock for black, when changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub black_time_ms: Option<i64>,
    /// New turn start timestamp, when changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_started_at_ms: Option<i64>,
    /// Full move list after the mutation, when changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moves: Option<Vec<String>>,
    /// Re-rendered transcript, when changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<String>,
    /// Terminal result, when the game concluded.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub result: Option<GameResult>,
    /// Conclusion method, when the game concluded.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub method: Option<GameMethod>,
    /// New state of white's draw offer flag, when changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub white_draw_offered: Option<bool>,
    /// New state of black's draw offer flag, when changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub black_draw_offered: Option<bool>,
}

impl From<&SessionUpdate> for GameDelta {
    fn from(update: &SessionUpdate) -> Self {
        let changes = &update.changes;
        Self {
            game_id: update.game_id,
            version: update.version,
            white_time_ms: changes.white_time_ms,
            black_time_ms: changes.black_time_ms,
            turn_started_at_ms: changes.turn_started_at_ms,
            moves: changes.moves.clone(),
            history: changes.history.clone(),
            result: changes.result,
            method: changes.method,
            white_draw_offered: changes.white_draw_offered,
            black_draw_offered: changes.black_draw_offered,
        }
    }
}

#[cfg(test)]
mod tests {
    use validator::Validate;

    use super::*;

    fn request() -> CreateGameRequest {
        CreateGameRequest {
            white_id: "alice".into(),
            black_id: "bob".into(),
            base_time_ms: 300_000,
            increment_ms: 2_000,
        }
    }

    #[test]
    fn well_formed_request_passes_validation() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn out_of_range_time_control_is_rejected() {
        let mut req = request();
        req.base_time_ms = 10;
        assert!(req.validate().is_err());

        let mut req = request();
        req.increment_ms = -5;
        assert!(req.validate().is_err());
    }

    #[test]
    fn malformed_player_ids_are_rejected() {
        let mut req = request();
        req.white_id = "".into();
        assert!(req.validate().is_err());

        let mut req = request();
        req.black_id = "b o b".into();
        assert!(req.validate().is_err());
    }
}
