use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for MongoDB DAO operations.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures raised by the MongoDB game store.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// The connection URI could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// The offending URI.
        uri: String,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// Client options were rejected by the driver.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// The database never answered the initial ping.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// Number of pings sent before giving up.
        attempts: u32,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// A routine liveness ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// Index creation failed at startup.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        /// Collection carrying the index.
        collection: &'static str,
        /// Index key description.
        index: &'static str,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// A fresh game document could not be written.
    #[error("failed to insert game `{id}`")]
    InsertGame {
        /// Game identifier.
        id: Uuid,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// A game document could not be read.
    #[error("failed to load game `{id}`")]
    LoadGame {
        /// Game identifier.
        id: Uuid,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// A versioned update could not be executed.
    #[error("failed to update game `{id}`")]
    UpdateGame {
        /// Game identifier.
        id: Uuid,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// A change-set value refused BSON encoding.
    #[error("failed to encode change set for game `{id}`")]
    EncodeChanges {
        /// Game identifier.
        id: Uuid,
        /// Serializer-level cause.
        #[source]
        source: mongodb::bson::error::Error,
    },
}
