use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for MongoDB record store operations.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures of the MongoDB record store. Every `source` is the driver error.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// The connection string could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// Connection string with credentials masked.
        uri: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The driver rejected the parsed options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The server did not answer the ping sent right after connecting.
    #[error("MongoDB database `{database}` did not answer the initial ping")]
    InitialPing {
        /// Database that was pinged.
        database: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A periodic health ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Index creation failed at startup.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        /// Collection being indexed.
        collection: &'static str,
        /// Indexed fields, comma separated.
        index: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Upserting a poll failed.
    #[error("failed to save poll `{id}`")]
    SavePoll {
        /// Poll identifier.
        id: Uuid,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Reading a poll failed.
    #[error("failed to load poll `{id}`")]
    LoadPoll {
        /// Poll identifier.
        id: Uuid,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Listing polls failed.
    #[error("failed to list polls")]
    ListPolls {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Upserting a session failed.
    #[error("failed to save session `{id}`")]
    SaveSession {
        /// Session identifier.
        id: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Reading sessions failed.
    #[error("failed to load session")]
    LoadSession {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A counter or status update on a session failed.
    #[error("failed to update session `{id}`")]
    UpdateSession {
        /// Session identifier.
        id: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Upserting a chat message failed.
    #[error("failed to save chat message `{id}`")]
    SaveMessage {
        /// Message identifier.
        id: Uuid,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Reading chat messages failed.
    #[error("failed to load chat messages")]
    LoadMessages {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A stored document could not be mapped back to a record.
    #[error("stored document `{id}` is malformed: {reason}")]
    MalformedDocument {
        /// `_id` of the offending document.
        id: String,
        /// What was wrong with it.
        reason: String,
    },
}
