//! Where the record store lives and how a single connection attempt is made.
//!
//! Retries and backoff belong to the storage supervisor, so opening a database here
//! pings once and reports the failure.

use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tracing::debug;

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DATABASE: &str = "live_poll";
const APP_NAME: &str = "live-poll-back";
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Connection settings for the MongoDB record store.
#[derive(Clone)]
pub struct MongoConfig {
    /// Parsed client options with the app name and selection timeout filled in.
    pub options: ClientOptions,
    /// Database holding the polls, sessions and chat collections.
    pub database_name: String,
}

impl MongoConfig {
    /// Parse a connection string.
    ///
    /// The database is `db_name`, else the one named in the URI path, else `live_poll`.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let mut options =
            ClientOptions::parse(uri)
                .await
                .map_err(|source| MongoDaoError::InvalidUri {
                    uri: redact_credentials(uri),
                    source,
                })?;
        options.app_name.get_or_insert_with(|| APP_NAME.to_owned());
        options
            .server_selection_timeout
            .get_or_insert(SERVER_SELECTION_TIMEOUT);

        let database_name = db_name
            .map(str::to_owned)
            .or_else(|| options.default_database.clone())
            .unwrap_or_else(|| DEFAULT_DATABASE.to_owned());

        Ok(Self {
            options,
            database_name,
        })
    }

    /// Build a client and require one successful ping.
    pub(super) async fn open(&self) -> MongoResult<(Client, Database)> {
        let client = Client::with_options(self.options.clone())
            .map_err(|source| MongoDaoError::ClientConstruction { source })?;
        let database = client.database(&self.database_name);

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::InitialPing {
                database: self.database_name.clone(),
                source,
            })?;
        debug!(database = %self.database_name, "MongoDB answered initial ping");

        Ok((client, database))
    }
}

/// Hide `user:password@` so a bad URI can be logged.
fn redact_credentials(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &uri[..scheme_end], &uri[at + 1..])
        }
        _ => uri.to_owned(),
    }
}
