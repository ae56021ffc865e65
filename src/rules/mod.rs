//! Rules oracle capability.
//!
//! The session layer treats move legality, outcome detection, and draw
//! eligibility as an opaque capability behind [`RulesOracle`], so the
//! coordinator never inspects board state itself and tests can substitute
//! misbehaving oracles.

/// Standard-chess implementation of the oracle.
pub mod standard;

use thiserror::Error;

use crate::dao::models::{GameMethod, Side};

pub use standard::StandardRules;

/// Failures surfaced by the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    /// The stored move list itself does not replay, which points at a
    /// corrupted record rather than a client mistake.
    #[error("stored history does not replay at ply {ply}: `{notation}`")]
    InvalidHistory {
        /// Zero-based index of the unreplayable move.
        ply: usize,
        /// The offending notation.
        notation: String,
    },
    /// A candidate move was rejected.
    #[error("illegal move `{notation}`")]
    IllegalMove {
        /// The rejected notation.
        notation: String,
    },
}

/// Terminal verdict reported by the oracle after a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// One side won.
    Decisive {
        /// The winning side.
        winner: Side,
        /// How the win was achieved.
        method: GameMethod,
    },
    /// The game is drawn by rule.
    Drawn {
        /// Which rule produced the draw.
        method: GameMethod,
    },
}

/// A replayed position that candidate moves can be applied to.
pub trait Position: Send {
    /// Side whose turn it is.
    fn side_to_move(&self) -> Side;
    /// Validate and apply one candidate move.
    fn apply(&mut self, notation: &str) -> Result<(), RulesError>;
    /// Terminal verdict for the current position, if any.
    fn outcome(&self) -> Option<Outcome>;
    /// Whether either side may claim a draw (repetition or move-count rule).
    fn draw_claimable(&self) -> bool;
    /// Canonical rendered transcript of the moves that produced this
    /// position.
    fn transcript(&self) -> String;
}

/// Entry point of the capability: rebuild a position from a move list.
pub trait RulesOracle: Send + Sync {
    /// Replay a stored move list from the initial position.
    fn replay(&self, moves: &[String]) -> Result<Box<dyn Position>, RulesError>;
}
