use thiserror::Error;

use super::connection::ConnectionId;

/// Errors surfaced to operators and stream clients by the session layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("settings update must contain at least one field")]
    EmptyUpdate,
    #[error("connection {0} not found")]
    NotFound(ConnectionId),
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    #[error("connection limit of {0} reached")]
    AtCapacity(usize),
}
