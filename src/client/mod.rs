mod http;
pub mod push;

use crate::protocol::StartGameAck;
use crate::types::*;
use async_trait::async_trait;
use std::time::Duration;

pub use http::HttpGameClient;

/// Result type for calls to the game server
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur while talking to the game server
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server rejected request ({code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("Response parsing failed: {0}")]
    Parse(String),
}

/// Game-control collaborator: starts games and wipes server state.
/// Failures are reported, never retried.
#[async_trait]
pub trait GameControl: Send + Sync {
    /// Start a game with the given word assignment
    async fn start_game(&self, words: &WordPair) -> ControlResult<StartGameAck>;

    /// Begin the next round of the game in progress
    async fn start_round(&self) -> ControlResult<()>;

    /// Soft reset: end the current game, keep registered groups
    async fn reset(&self) -> ControlResult<()>;

    /// Hard clear: drop everything on the server
    async fn clear_all(&self) -> ControlResult<()>;
}

/// Poll endpoint returning the full game snapshot
#[async_trait]
pub trait StatePoller: Send + Sync {
    async fn fetch_state(&self) -> ControlResult<GameSnapshot>;
}
