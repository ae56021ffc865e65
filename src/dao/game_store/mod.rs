/// Volatile backend used by tests and storage-free development runs.
pub mod memory;
#[cfg(feature = "mongo-store")]
/// MongoDB-backed persistence.
pub mod mongodb;

use crate::dao::models::{GameChanges, GameEntity};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Abstraction over the persistence layer for match records.
///
/// `update_game` is the single serialization point for concurrent mutations
/// of one game: it compares the stored `version` against `expected_version`
/// and applies the change set plus a version bump atomically, or does
/// nothing at all. `Ok(false)` always means "someone else got there first",
/// never a partial write.
pub trait GameStore: Send + Sync {
    /// Persist a freshly created game under its preassigned id.
    fn insert_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Fetch a game snapshot by id.
    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>>;
    /// Compare-and-swap update: apply `changes` and advance the version by
    /// one, only if the stored version still equals `expected_version`.
    fn update_game(
        &self,
        id: Uuid,
        expected_version: i64,
        changes: GameChanges,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Probe backend liveness.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Attempt to re-establish a dropped backend connection.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
