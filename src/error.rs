//! Error taxonomy for match handling

use crate::store::StoreError;

/// Errors surfaced by matchmaking, session and dispatch operations.
///
/// None of these terminate a connection; the dispatch boundary turns each
/// one into an outbound `ERROR` message.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Invalid message: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resource busy, dropped after retry: {0}")]
    ConcurrencyConflict(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Send PLAYER_CONNECT before any other message")]
    NotConnected,
}

pub type GameResult<T> = Result<T, GameError>;

impl From<StoreError> for GameError {
    fn from(err: StoreError) -> Self {
        GameError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for GameError {
    fn from(err: serde_json::Error) -> Self {
        GameError::Validation(err.to_string())
    }
}
