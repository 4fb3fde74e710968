//! Error types for the hub
//!
//! Three families, each with its own propagation policy:
//! - `HubError`: registry failures, returned synchronously to the caller
//! - `ApplyError`: semantic rejections from the event collaborator,
//!   unicast back to the originating client as an `error` event
//! - `TransportError`: connection faults, local to one client actor

use thiserror::Error;

use crate::types::RoomId;

/// Hub registry errors
#[derive(Debug, Error)]
pub enum HubError {
    /// No room is registered under this id
    #[error("Room not found: {0}")]
    NotFound(RoomId),

    /// A room with this id is already registered
    #[error("Room already exists: {0}")]
    AlreadyExists(RoomId),

    /// The room was torn down while an operation was in flight
    #[error("Room closed: {0}")]
    RoomClosed(RoomId),

    /// The hub has been cancelled and accepts no new rooms
    #[error("Hub is shutting down")]
    ShuttingDown,

    /// Room actors did not terminate within the shutdown grace period
    #[error("Shutdown grace period elapsed with {pending} room(s) still running")]
    ShutdownTimeout { pending: usize },
}

/// Errors reported by the event-application collaborator
///
/// Each variant maps to a stable wire code via [`ApplyError::code`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("invalid payload")]
    InvalidPayload,

    #[error("user is not a member of the room")]
    NotRoomMember,

    #[error("forbidden")]
    Forbidden,

    #[error("unsupported event type: {0}")]
    UnsupportedEvent(String),

    /// Anything else; details are logged but never sent to the client
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApplyError {
    /// Stable error code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            ApplyError::InvalidPayload => "invalid_payload",
            ApplyError::NotRoomMember => "not_room_member",
            ApplyError::Forbidden => "forbidden",
            ApplyError::UnsupportedEvent(_) => "unsupported_event",
            ApplyError::Internal(_) => "internal_error",
        }
    }

    /// Client-facing message
    pub fn client_message(&self) -> String {
        match self {
            ApplyError::Internal(_) => "something went wrong".to_string(),
            ApplyError::UnsupportedEvent(_) => "unsupported event type".to_string(),
            other => other.to_string(),
        }
    }
}

/// Connection-level errors (always fatal for that one connection)
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The other side of the connection is gone
    #[error("Connection closed")]
    Closed,
}
