use std::str::FromStr;

use chess::{Board, ChessMove, Color, Game, MoveGen, Piece};

use super::{Outcome, Position, RulesError, RulesOracle};
use crate::dao::models::{GameMethod, Side};

/// Oracle for standard chess, backed by the `chess` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRules;

impl StandardRules {
    /// Create the oracle.
    pub fn new() -> Self {
        Self
    }
}

impl RulesOracle for StandardRules {
    fn replay(&self, moves: &[String]) -> Result<Box<dyn Position>, RulesError> {
        let mut game = Game::new();
        for (ply, notation) in moves.iter().enumerate() {
            let accepted = ChessMove::from_str(notation)
                .map(|candidate| game.make_move(candidate))
                .unwrap_or(false);
            if !accepted {
                return Err(RulesError::InvalidHistory {
                    ply,
                    notation: notation.clone(),
                });
            }
        }
        Ok(Box::new(StandardPosition {
            game,
            moves: moves.to_vec(),
        }))
    }
}

struct StandardPosition {
    game: Game,
    moves: Vec<String>,
}

impl Position for StandardPosition {
    fn side_to_move(&self) -> Side {
        side_from(self.game.side_to_move())
    }

    fn apply(&mut self, notation: &str) -> Result<(), RulesError> {
        let accepted = ChessMove::from_str(notation)
            .map(|candidate| self.game.make_move(candidate))
            .unwrap_or(false);
        if !accepted {
            return Err(RulesError::IllegalMove {
                notation: notation.to_owned(),
            });
        }
        self.moves.push(notation.to_owned());
        Ok(())
    }

    fn outcome(&self) -> Option<Outcome> {
        let board = self.game.current_position();
        if MoveGen::new_legal(&board).count() == 0 {
            if board.checkers().popcnt() > 0 {
                let winner = match board.side_to_move() {
                    Color::White => Side::Black,
                    Color::Black => Side::White,
                };
                Some(Outcome::Decisive {
                    winner,
                    method: GameMethod::Checkmate,
                })
            } else {
                Some(Outcome::Drawn {
                    method: GameMethod::Stalemate,
                })
            }
        } else if insufficient_material(&board) {
            Some(Outcome::Drawn {
                method: GameMethod::InsufficientMaterial,
            })
        } else {
            None
        }
    }

    fn draw_claimable(&self) -> bool {
        self.game.can_declare_draw()
    }

    fn transcript(&self) -> String {
        render_transcript(&self.moves)
    }
}

fn side_from(color: Color) -> Side {
    match color {
        Color::White => Side::White,
        Color::Black => Side::Black,
    }
}

/// Render a move list as a numbered transcript, one number per full move.
pub(crate) fn render_transcript(moves: &[String]) -> String {
    moves
        .chunks(2)
        .enumerate()
        .map(|(number, pair)| match pair {
            [white, black] => format!("{}. {} {}", number + 1, white, black),
            [white] => format!("{}. {}", number + 1, white),
            _ => String::new(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Neither side can force mate: bare kings, a lone minor piece, or a single
/// same-shade bishop each.
fn insufficient_material(board: &Board) -> bool {
    let heavy =
        *board.pieces(Piece::Pawn) | *board.pieces(Piece::Rook) | *board.pieces(Piece::Queen);
    if heavy.popcnt() > 0 {
        return false;
    }

    let knights = *board.pieces(Piece::Knight);
    let bishops = *board.pieces(Piece::Bishop);
    match (knights | bishops).popcnt() {
        0 | 1 => true,
        2 => {
            if knights.popcnt() > 0 {
                return false;
            }
            let per_side = (bishops & *board.color_combined(Color::White)).popcnt();
            if per_side != 1 {
                return false;
            }
            let mut squares = bishops;
            match (squares.next(), squares.next()) {
                (Some(first), Some(second)) => square_shade(first) == square_shade(second),
                _ => false,
            }
        }
        _ => false,
    }
}

fn square_shade(square: chess::Square) -> usize {
    (square.get_rank().to_index() + square.get_file().to_index()) % 2
}
