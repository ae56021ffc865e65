use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// REST payloads for game bootstrap and snapshots.
pub mod game;
/// Health check payload.
pub mod health;
/// Validation helpers shared by DTOs.
pub mod validation;
/// WebSocket frame definitions.
pub mod ws;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
