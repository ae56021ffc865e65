use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// The two sides of the board.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The side that moves first.
    White,
    /// The side that moves second.
    Black,
}

impl Side {
    /// The other side of the board.
    pub fn opponent(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

/// Terminal result of a match. Absent while the game is still being played.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GameResult {
    /// White took the full point.
    WhiteWon,
    /// Black took the full point.
    BlackWon,
    /// The point was split.
    Draw,
}

impl GameResult {
    /// The decisive result awarding the game to `side`.
    pub fn win_for(side: Side) -> GameResult {
        match side {
            Side::White => GameResult::WhiteWon,
            Side::Black => GameResult::BlackWon,
        }
    }
}

/// How a concluded game ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GameMethod {
    /// The side to move has no legal reply and is in check.
    Checkmate,
    /// The side to move has no legal reply and is not in check.
    Stalemate,
    /// Neither side retains mating material.
    InsufficientMaterial,
    /// A player gave up the game.
    Resignation,
    /// A clock ran out before the side on the move acted.
    Timeout,
    /// Both players agreed to a draw.
    Agreement,
}

/// Aggregate match entity persisted by the storage layer.
///
/// Mutations never touch a stored entity in place: every write path builds a
/// [`GameChanges`] and submits it through the version-checked update, which is
/// the only place the `version` counter advances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameEntity {
    /// Primary key of the game, assigned at creation.
    pub id: Uuid,
    /// Identity of the player holding the white pieces.
    pub white_id: String,
    /// Identity of the player holding the black pieces.
    pub black_id: String,
    /// Starting clock budget per side, in milliseconds.
    pub base_time_ms: i64,
    /// Time credited back to a side after each of its moves, in milliseconds.
    pub increment_ms: i64,
    /// White's remaining clock, in milliseconds.
    pub white_time_ms: i64,
    /// Black's remaining clock, in milliseconds.
    pub black_time_ms: i64,
    /// Wall-clock unix milliseconds at which the current turn began.
    pub turn_started_at_ms: i64,
    /// Append-only list of accepted moves in coordinate notation.
    pub moves: Vec<String>,
    /// Rendered transcript derived from `moves`.
    pub history: String,
    /// Terminal result, `None` while the game is ongoing. Write-once.
    pub result: Option<GameResult>,
    /// How the game concluded, set together with `result`.
    pub method: Option<GameMethod>,
    /// Whether white has a standing draw offer.
    pub white_draw_offered: bool,
    /// Whether black has a standing draw offer.
    pub black_draw_offered: bool,
    /// Optimistic concurrency counter; starts at 1 and advances by exactly
    /// one per successful update.
    pub version: i64,
    /// Creation timestamp for auditing/debugging.
    pub created_at: SystemTime,
}

impl GameEntity {
    /// Side played by `player_id`, if the player participates in this game.
    pub fn side_of(&self, player_id: &str) -> Option<Side> {
        if self.white_id == player_id {
            Some(Side::White)
        } else if self.black_id == player_id {
            Some(Side::Black)
        } else {
            None
        }
    }

    /// Identity of the player on the given side.
    pub fn identity_of(&self, side: Side) -> &str {
        match side {
            Side::White => &self.white_id,
            Side::Black => &self.black_id,
        }
    }

    /// Remaining clock for the given side, in milliseconds.
    pub fn time_remaining_ms(&self, side: Side) -> i64 {
        match side {
            Side::White => self.white_time_ms,
            Side::Black => self.black_time_ms,
        }
    }

    /// Whether a standing draw offer exists for the given side.
    pub fn draw_offered_by(&self, side: Side) -> bool {
        match side {
            Side::White => self.white_draw_offered,
            Side::Black => self.black_draw_offered,
        }
    }
}

/// Explicit change set submitted to the versioned update.
///
/// One optional slot per mutable field; absent slots leave the stored value
/// untouched. Backends translate this into their native partial-update form,
/// so no mutation path ever names columns or fields dynamically.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GameChanges {
    /// New remaining clock for white.
    pub white_time_ms: Option<i64>,
    /// New remaining clock for black.
    pub black_time_ms: Option<i64>,
    /// New turn start timestamp.
    pub turn_started_at_ms: Option<i64>,
    /// Full replacement move list (the previous list plus one move).
    pub moves: Option<Vec<String>>,
    /// Re-rendered transcript matching `moves`.
    pub history: Option<String>,
    /// Terminal result being recorded.
    pub result: Option<GameResult>,
    /// Conclusion method being recorded.
    pub method: Option<GameMethod>,
    /// New state of white's draw offer flag.
    pub white_draw_offered: Option<bool>,
    /// New state of black's draw offer flag.
    pub black_draw_offered: Option<bool>,
}

impl GameChanges {
    /// Whether this change set records a game conclusion.
    pub fn concludes_game(&self) -> bool {
        self.result.is_some()
    }

    /// Apply the populated slots to `game`, leaving the version counter to
    /// the caller.
    pub fn apply_to(&self, game: &mut GameEntity) {
        if let Some(value) = self.white_time_ms {
            game.white_time_ms = value;
        }
        if let Some(value) = self.black_time_ms {
            game.black_time_ms = value;
        }
        if let Some(value) = self.turn_started_at_ms {
            game.turn_started_at_ms = value;
        }
        if let Some(ref value) = self.moves {
            game.moves = value.clone();
        }
        if let Some(ref value) = self.history {
            game.history = value.clone();
        }
        if let Some(value) = self.result {
            game.result = Some(value);
        }
        if let Some(value) = self.method {
            game.method = Some(value);
        }
        if let Some(value) = self.white_draw_offered {
            game.white_draw_offered = value;
        }
        if let Some(value) = self.black_draw_offered {
            game.black_draw_offered = value;
        }
    }
}
