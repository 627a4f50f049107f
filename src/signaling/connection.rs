use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use ulid::Ulid;

use crate::protocol::{ParticipantId, RoomId, ServerEvent};

/// What the relay pushes down a connection's socket.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
  Event(ServerEvent),
  Ping,
}

pub type ConnectionSender = UnboundedSender<Outbound>;

/// Transport identity of one relay connection. Changes on every reconnect.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct ConnectionId(Ulid);

impl ConnectionId {
  pub(super) fn new() -> Self {
    Self(Ulid::new())
  }
}

impl fmt::Display for ConnectionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0.to_string().to_lowercase())
  }
}

/// The (room, participant) a connection currently speaks for.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Membership {
  pub room_id: RoomId,
  pub participant_id: ParticipantId,
}

#[derive(Debug, Serialize)]
pub struct Connection {
  pub id: ConnectionId,
  pub membership: Option<Membership>,
  pub is_alive: bool,
  #[serde(skip)]
  pub sender: ConnectionSender,
}

impl Connection {
  pub(super) fn new(id: ConnectionId, sender: ConnectionSender) -> Self {
    Self { id, membership: None, is_alive: true, sender }
  }
}
