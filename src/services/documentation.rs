use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for blitz-back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::game::create_game,
        crate::routes::game::get_game,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::game::CreateGameRequest,
            crate::dto::game::GameSnapshot,
            crate::dto::game::GameDelta,
            crate::dto::ws::ClientFrame,
            crate::dto::ws::ServerFrame,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "game", description = "Game bootstrap and snapshot reads"),
        (name = "play", description = "WebSocket operations for players"),
    )
)]
pub struct ApiDoc;
