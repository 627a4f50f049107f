//! Relay error types.
//!
//! Each variant maps to a stable machine-readable code sent to clients in `error` events.

use thiserror::Error;

use crate::signaling::ConnectionId;

#[derive(Debug, Error)]
pub enum SignalingError {
  /// Join payload parsed but carried unusable values.
  #[error("invalid join: {0}")]
  InvalidJoin(String),

  /// Frame could not be decoded into a known message.
  #[error("malformed message: {0}")]
  Malformed(String),

  /// Admission decision from a connection that does not hold the host slot.
  #[error("permission denied: {0}")]
  PermissionDenied(String),

  /// Connection tried to act inside a room it never joined.
  #[error("connection {0} has not joined a room")]
  NotJoined(ConnectionId),

  #[error("connection {0} does not exist")]
  ConnectionNotFound(ConnectionId),
}

impl SignalingError {
  pub fn code(&self) -> &'static str {
    match self {
      SignalingError::InvalidJoin(_) => "invalid-join",
      SignalingError::Malformed(_) => "malformed-message",
      SignalingError::PermissionDenied(_) => "permission-denied",
      SignalingError::NotJoined(_) => "not-joined",
      SignalingError::ConnectionNotFound(_) => "connection-not-found",
    }
  }
}
