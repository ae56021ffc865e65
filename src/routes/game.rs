use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::game::{CreateGameRequest, GameSnapshot},
    error::AppError,
    services::game_service,
    state::SharedState,
};

/// Routes handling game bootstrap and snapshot reads.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/games", post(create_game))
        .route("/games/{id}", get(get_game))
}

/// Start a match between two players.
#[utoipa::path(
    post,
    path = "/games",
    tag = "game",
    request_body = CreateGameRequest,
    responses(
        (status = 200, description = "Game created", body = GameSnapshot)
    )
)]
pub async fn create_game(
    State(state): State<SharedState>,
    Json(payload): Json<CreateGameRequest>,
) -> Result<Json<GameSnapshot>, AppError> {
    let snapshot = game_service::create_game(&state, payload).await?;
    Ok(Json(snapshot))
}

/// Fetch the authoritative snapshot of a game, used by clients to
/// resynchronize after a stale-update rejection.
#[utoipa::path(
    get,
    path = "/games/{id}",
    tag = "game",
    params(("id" = String, Path, description = "Identifier of the game to fetch")),
    responses(
        (status = 200, description = "Current game snapshot", body = GameSnapshot)
    )
)]
pub async fn get_game(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GameSnapshot>, AppError> {
    let snapshot = game_service::get_game(&state, id).await?;
    Ok(Json(snapshot))
}
