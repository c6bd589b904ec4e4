// Public API for the binary and integration tests

pub mod api;
pub mod client;
pub mod config;
pub mod protocol;
pub mod runtime;
pub mod state;
pub mod types;
