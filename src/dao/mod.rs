/// Durable record definitions.
pub mod models;
/// Durable record store and its backends.
pub mod record_store;
/// Ephemeral live-session store.
pub mod session_cache;
/// Storage error types shared by every backend.
pub mod storage;
