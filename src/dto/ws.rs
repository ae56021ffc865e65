use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::game::GameDelta;

/// Messages accepted from player WebSocket clients.
///
/// The first frame on a fresh socket must be `identification`; everything
/// else names the game it acts on.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Bind this socket to a participant identity.
    #[serde(rename = "identification")]
    Identification {
        /// Participant identity.
        id: String,
    },
    /// Play a move in coordinate notation.
    #[serde(rename = "move")]
    Move {
        /// Target game.
        game_id: Uuid,
        /// Candidate move, e.g. `e2e4` or `e7e8q`.
        notation: String,
    },
    /// Offer the opponent a draw.
    #[serde(rename = "offer_draw")]
    OfferDraw {
        /// Target game.
        game_id: Uuid,
    },
    /// Accept or decline a standing draw offer.
    #[serde(rename = "draw_response")]
    DrawResponse {
        /// Target game.
        game_id: Uuid,
        /// `true` accepts, `false` declines and clears the offer.
        accept: bool,
    },
    /// Concede the game.
    #[serde(rename = "resign")]
    Resign {
        /// Target game.
        game_id: Uuid,
    },
    /// Anything this server version does not understand.
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    /// Parse a frame from its JSON text representation.
    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Frames pushed to player WebSocket clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Positive acknowledgement after successful identification.
    #[serde(rename = "connected")]
    Connected {
        /// Identity this socket is now bound to.
        id: String,
    },
    /// Broadcast change set after a successful mutation.
    #[serde(rename = "game_update")]
    GameUpdate(GameDelta),
    /// A client action was refused.
    #[serde(rename = "rejection")]
    Rejection {
        /// Game the refused action addressed, when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        game_id: Option<Uuid>,
        /// Stable machine-readable error code.
        code: String,
        /// Human-readable explanation.
        message: String,
        /// Whether the client holds a stale snapshot and should refetch the
        /// game before retrying.
        resync: bool,
    },
}
