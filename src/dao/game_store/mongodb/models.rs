use mongodb::bson::{Binary, DateTime, Document, doc, serialize_to_bson, spec::BinarySubtype};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::models::{GameChanges, GameEntity, GameMethod, GameResult};

/// Persisted shape of a match record in the `games` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGameDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    white_id: String,
    black_id: String,
    base_time_ms: i64,
    increment_ms: i64,
    white_time_ms: i64,
    black_time_ms: i64,
    turn_started_at_ms: i64,
    moves: Vec<String>,
    history: String,
    result: Option<GameResult>,
    method: Option<GameMethod>,
    #[serde(default)]
    white_draw_offered: bool,
    #[serde(default)]
    black_draw_offered: bool,
    version: i64,
    created_at: DateTime,
}

impl From<GameEntity> for MongoGameDocument {
    fn from(value: GameEntity) -> Self {
        Self {
            id: value.id,
            white_id: value.white_id,
            black_id: value.black_id,
            base_time_ms: value.base_time_ms,
            increment_ms: value.increment_ms,
            white_time_ms: value.white_time_ms,
            black_time_ms: value.black_time_ms,
            turn_started_at_ms: value.turn_started_at_ms,
            moves: value.moves,
            history: value.history,
            result: value.result,
            method: value.method,
            white_draw_offered: value.white_draw_offered,
            black_draw_offered: value.black_draw_offered,
            version: value.version,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl From<MongoGameDocument> for GameEntity {
    fn from(value: MongoGameDocument) -> Self {
        Self {
            id: value.id,
            white_id: value.white_id,
            black_id: value.black_id,
            base_time_ms: value.base_time_ms,
            increment_ms: value.increment_ms,
            white_time_ms: value.white_time_ms,
            black_time_ms: value.black_time_ms,
            turn_started_at_ms: value.turn_started_at_ms,
            moves: value.moves,
            history: value.history,
            result: value.result,
            method: value.method,
            white_draw_offered: value.white_draw_offered,
            black_draw_offered: value.black_draw_offered,
            version: value.version,
            created_at: value.created_at.to_system_time(),
        }
    }
}

pub fn uuid_as_binary(id: Uuid) -> Binary {
    Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.into_bytes().to_vec(),
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": uuid_as_binary(id)}
}

/// Translate a change set into a `$set` document that also advances the
/// version counter. Only populated slots appear; every value goes through
/// the BSON serializer, never through string interpolation.
pub fn set_document(id: Uuid, changes: &GameChanges, next_version: i64) -> MongoResult<Document> {
    let mut set = doc! { "version": next_version };

    if let Some(value) = changes.white_time_ms {
        set.insert("white_time_ms", value);
    }
    if let Some(value) = changes.black_time_ms {
        set.insert("black_time_ms", value);
    }
    if let Some(value) = changes.turn_started_at_ms {
        set.insert("turn_started_at_ms", value);
    }
    if let Some(ref value) = changes.moves {
        set.insert("moves", value.clone());
    }
    if let Some(ref value) = changes.history {
        set.insert("history", value.clone());
    }
    if let Some(ref value) = changes.result {
        let encoded =
            serialize_to_bson(value).map_err(|source| MongoDaoError::EncodeChanges { id, source })?;
        set.insert("result", encoded);
    }
    if let Some(ref value) = changes.method {
        let encoded =
            serialize_to_bson(value).map_err(|source| MongoDaoError::EncodeChanges { id, source })?;
        set.insert("method", encoded);
    }
    if let Some(value) = changes.white_draw_offered {
        set.insert("white_draw_offered", value);
    }
    if let Some(value) = changes.black_draw_offered {
        set.insert("black_draw_offered", value);
    }

    Ok(set)
}
