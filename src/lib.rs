//! Library crate for live-poll-back, exposing modules for binaries and integration tests.

/// Runtime settings loaded from JSON and the environment.
pub mod config;
/// Record store, live-session cache and their models.
pub mod dao;
/// Wire payloads for REST and WebSocket clients.
pub mod dto;
/// Service error taxonomy and its HTTP mapping.
pub mod error;
/// HTTP and WebSocket routes.
pub mod routes;
/// Poll, roster, chat and housekeeping logic.
pub mod services;
/// Shared application state.
pub mod state;
