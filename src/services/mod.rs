/// OpenAPI documentation generation.
pub mod documentation;
/// Game bootstrap and snapshot reads.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// Session coordinator applying moves, draws, resignations, and timeouts.
pub mod session;
/// Storage connection supervisor with degraded-mode handling.
pub mod storage_supervisor;
/// Per-game timeout scheduling and the expiry loop.
pub mod timer;
/// WebSocket connection and message handling service.
pub mod websocket_service;
